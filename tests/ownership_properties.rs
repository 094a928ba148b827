//! Property-based tests for release-exactly-once across owned and shared wrappers

use holdfast::testing::ReleaseCounter;
use holdfast::{assert_released, OwnedResource, SharedResource, Transfer};
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
    Reset,
    ResetTo(u8),
    ResetToHandle(u8),
    Take,
    Detach,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Reset),
        any::<u8>().prop_map(Op::ResetTo),
        any::<u8>().prop_map(Op::ResetToHandle),
        Just(Op::Take),
        Just(Op::Detach),
    ]
}

proptest! {
    #[test]
    fn prop_any_drop_order_releases_once(
        order in Just((0..8usize).collect::<Vec<_>>()).prop_shuffle()
    ) {
        let counter = ReleaseCounter::new();
        let first = SharedResource::from_raw(42u32, counter.release_fn()).unwrap();
        let mut copies: Vec<Option<SharedResource<u32>>> =
            (0..7).map(|_| Some(first.clone())).collect();
        copies.push(Some(first));
        prop_assert_eq!(copies[0].as_ref().map(|c| c.use_count()), Some(8));

        for (step, idx) in order.iter().enumerate() {
            copies[*idx] = None;
            let expected = if step == order.len() - 1 { 1 } else { 0 };
            prop_assert_eq!(counter.total(), expected);
        }
    }

    #[test]
    fn prop_owned_ops_never_double_release(
        initial in any::<u8>(),
        ops in prop::collection::vec(op(), 0..40)
    ) {
        let counter = ReleaseCounter::new();
        let mut live: OwnedResource<u8> = OwnedResource::from_raw(initial, counter.release_fn());
        let mut moved: Vec<OwnedResource<u8>> = Vec::new();
        let mut acquired = 1usize;
        let mut detached = 0usize;

        for op in ops {
            match op {
                Op::Reset => live.reset(),
                Op::ResetTo(v) => {
                    live.reset_to(v);
                    acquired += 1;
                }
                Op::ResetToHandle(v) => {
                    let same = live.get().ok() == Some(&v);
                    live.reset_to_handle(v);
                    if !same {
                        acquired += 1;
                    }
                }
                Op::Take => moved.push(live.take()),
                Op::Detach => {
                    if live.release().is_some() {
                        detached += 1;
                    }
                }
            }
        }

        drop(live);
        drop(moved);
        prop_assert_eq!(counter.total() + detached, acquired);
    }

    #[test]
    fn prop_transfer_chain_releases_once(hops in 1usize..20) {
        use holdfast::Duplicate;

        let counter = ReleaseCounter::new();
        let mut current: OwnedResource<u16, Transfer> =
            OwnedResource::from_raw(7, counter.release_fn());
        let mut husks = Vec::new();
        for _ in 0..hops {
            let next = current.duplicate().unwrap();
            husks.push(std::mem::replace(&mut current, next));
        }
        prop_assert!(husks.iter().all(|h| h.is_empty()));
        drop(husks);
        prop_assert_eq!(counter.total(), 0);
        drop(current);
        assert_released!(counter, 7u16, 1);
    }
}

#[test]
fn shared_copies_across_threads_release_once() {
    let counter = ReleaseCounter::new();
    let root = SharedResource::from_raw("conn".to_string(), counter.release_fn()).unwrap();
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let copy = root.clone();
            std::thread::spawn(move || copy.len())
        })
        .collect();
    drop(root);
    for h in handles {
        assert_eq!(h.join().unwrap(), 4);
    }
    assert_released!(counter, "conn", 1);
}

#[test]
fn unwrap_then_share_again() {
    let counter = ReleaseCounter::new();
    let shared = SharedResource::from_raw(5u8, counter.release_fn()).unwrap();
    let owned = shared.try_unwrap().unwrap();
    let shared = owned.into_shared().unwrap();
    assert_eq!(shared.use_count(), 1);
    assert_eq!(counter.total(), 0);
    drop(shared);
    assert_released!(counter, 5u8, 1);
}
