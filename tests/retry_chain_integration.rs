//! Integration tests for the process-wide allocation retry chain.
//!
//! Tests in this binary run concurrently against one global chain, so each
//! test installs handlers only for its own key type.

use holdfast::memory::{self, RawBlock};
use holdfast::retry::{self, handler, handlers, BackoffPolicy, HandlerOutcome};
use holdfast::testing::{CapacityPool, ReleaseCounter};
use holdfast::{assert_released, ExhaustionCause, SharedResource};
use std::alloc::Layout;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Global chain
// ============================================================================

#[test]
fn typed_handler_frees_pool_capacity() {
    struct Frame;

    let pool = CapacityPool::new(0);
    let p = pool.clone();
    let calls = Arc::new(AtomicU32::new(0));
    let c = calls.clone();
    let _guard = retry::global().scoped_for::<Frame>(handler(move || {
        c.fetch_add(1, Ordering::SeqCst);
        p.grow(1);
        HandlerOutcome::Retry
    }));

    let slot = retry::global()
        .allocate_keyed::<Frame, _, _>(|| pool.try_take())
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    drop(slot);
    assert_eq!(pool.available(), 1);
}

#[test]
fn typed_guard_shadows_and_restores() {
    #[derive(Debug)]
    struct Packet;

    let chain = retry::global();
    let outer = handlers::give_up();
    let _outer_guard = chain.scoped_for::<Packet>(outer.clone());
    {
        let inner = chain.scoped_for::<Packet>(handlers::terminate());
        assert!(Arc::ptr_eq(inner.previous().unwrap(), &outer));
        assert_eq!(chain.depth_for::<Packet>(), 2);
    }
    assert_eq!(chain.depth_for::<Packet>(), 1);

    let err = chain.allocate::<Packet, _>(|| None).unwrap_err();
    assert_eq!(err.cause, ExhaustionCause::HandlerGaveUp);
}

#[test]
fn backoff_handler_waits_for_capacity() {
    struct Conn;

    let policy = BackoffPolicy::linear(Duration::from_millis(1)).with_max_retries(10);
    let _guard = retry::global().scoped_for::<Conn>(handlers::backoff(policy).unwrap());

    let pool = CapacityPool::new(0);
    let refill = pool.clone();
    let filler = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(2));
        refill.grow(1);
    });

    // Ten retries with growing pauses outlast the refill.
    let result = retry::global().allocate_keyed::<Conn, _, _>(|| pool.try_take());
    filler.join().unwrap();
    assert!(result.is_ok());
}

// ============================================================================
// Wrappers allocating through the chain
// ============================================================================

#[test]
fn shared_resource_block_uses_resource_type_handlers() {
    #[derive(Debug)]
    struct Session(u32);

    let calls = Arc::new(AtomicU32::new(0));
    let c = calls.clone();
    let _guard = retry::global().scoped_for::<Session>(handler(move || {
        c.fetch_add(1, Ordering::SeqCst);
        HandlerOutcome::GiveUp
    }));

    // The system allocator succeeds, so the handler never runs.
    let counter = ReleaseCounter::new();
    let session = SharedResource::from_raw(Session(1), counter.release_fn()).unwrap();
    assert_eq!(session.0, 1);
    drop(session);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_released!(counter, Session(1), 1);
}

#[test]
fn memory_blocks_round_trip() {
    let mut blocks: Vec<_> = (1..=8)
        .map(|n| memory::acquire_block(Layout::array::<u64>(n).unwrap()).unwrap())
        .collect();
    for (i, block) in blocks.iter_mut().enumerate() {
        let raw: &mut RawBlock = block.get_mut().unwrap();
        assert_eq!(raw.len(), (i + 1) * 8);
        raw.as_mut_slice().fill(0xEE);
    }
    assert!(blocks
        .iter()
        .all(|b| b.get().unwrap().as_slice().iter().all(|x| *x == 0xEE)));
}

#[test]
fn zero_sized_block_is_refused_before_the_chain() {
    let err = memory::acquire_block(Layout::new::<()>()).unwrap_err();
    assert!(err.acquisition_error().is_some());
    assert!(!err.is_out_of_resource());
}
