//! Compile-time capability categories and category-dispatched algorithms.
//!
//! Every traversable type declares its position in a four-step lattice:
//!
//! ```text
//! Input < Forward < Bidirectional < RandomAccess
//! ```
//!
//! A type declares its category through [`Categorized`]. Generic algorithms
//! select their implementation from that declaration when they are
//! monomorphized, so a type is never asked for a capability its category does
//! not promise, and no category is inspected at run time.
//!
//! The standard library's common iterators come pre-registered. User types
//! declare their own:
//!
//! ```rust
//! use holdfast::capability::{self, Categorized, Forward};
//!
//! #[derive(Clone)]
//! struct Countdown(u32);
//!
//! impl Iterator for Countdown {
//!     type Item = u32;
//!     fn next(&mut self) -> Option<u32> {
//!         let n = self.0.checked_sub(1)?;
//!         self.0 = n;
//!         Some(n)
//!     }
//! }
//!
//! impl Categorized for Countdown {
//!     type Category = Forward;
//! }
//!
//! let c = Countdown(5);
//! assert_eq!(capability::category_of::<Countdown>(), "forward");
//! assert_eq!(capability::distance(&c), 5);
//! ```
//!
//! Algorithms that need more than a type's declared category fail to
//! compile, even when the type happens to implement the required traits:
//!
//! ```compile_fail
//! use holdfast::capability::{self, Categorized, Input};
//!
//! #[derive(Clone)]
//! struct Replayable(std::vec::IntoIter<u8>);
//!
//! impl Iterator for Replayable {
//!     type Item = u8;
//!     fn next(&mut self) -> Option<u8> {
//!         self.0.next()
//!     }
//! }
//!
//! impl Categorized for Replayable {
//!     type Category = Input;
//! }
//!
//! // Cloneable, but declared single-pass: cannot be measured.
//! capability::distance(&Replayable(vec![1, 2].into_iter()));
//! ```
//!
//! ```compile_fail
//! use holdfast::capability::{self, Categorized, Forward};
//!
//! struct Deque(std::vec::IntoIter<u8>);
//!
//! impl Iterator for Deque {
//!     type Item = u8;
//!     fn next(&mut self) -> Option<u8> {
//!         self.0.next()
//!     }
//! }
//!
//! impl DoubleEndedIterator for Deque {
//!     fn next_back(&mut self) -> Option<u8> {
//!         self.0.next_back()
//!     }
//! }
//!
//! impl Categorized for Deque {
//!     type Category = Forward;
//! }
//!
//! // Double-ended, but declared forward-only: cannot step backwards.
//! capability::advance_back(&mut Deque(vec![1, 2].into_iter()), 1);
//! ```

use std::collections::{btree_map, btree_set, hash_map, hash_set, linked_list, vec_deque};

mod sealed {
    pub trait Sealed {}
}

/// A position in the capability lattice.
pub trait Category: sealed::Sealed + Send + Sync + 'static {
    /// Lowercase name, for diagnostics.
    const NAME: &'static str;
}

/// Single-pass traversal. Reading an element may consume it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Input;

/// Multi-pass traversal in one direction. The traversal state can be
/// cloned and replayed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Forward;

/// Forward traversal that can also step back from the end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Bidirectional;

/// Bidirectional traversal with constant-time jumps and known length.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RandomAccess;

impl sealed::Sealed for Input {}
impl sealed::Sealed for Forward {}
impl sealed::Sealed for Bidirectional {}
impl sealed::Sealed for RandomAccess {}

impl Category for Input {
    const NAME: &'static str = "input";
}

impl Category for Forward {
    const NAME: &'static str = "forward";
}

impl Category for Bidirectional {
    const NAME: &'static str = "bidirectional";
}

impl Category for RandomAccess {
    const NAME: &'static str = "random access";
}

/// `Self` satisfies every requirement of the coarser category `C`.
///
/// Reflexive and transitive: `RandomAccess: Refines<Input>` holds.
pub trait Refines<C: Category>: Category {}

macro_rules! refines {
    ($fine:ty => $($coarse:ty),+) => {
        $(impl Refines<$coarse> for $fine {})+
    };
}

refines!(Input => Input);
refines!(Forward => Forward, Input);
refines!(Bidirectional => Bidirectional, Forward, Input);
refines!(RandomAccess => RandomAccess, Bidirectional, Forward, Input);

/// A type's self-declared capability category.
pub trait Categorized {
    /// The category this type guarantees.
    type Category: Category;
}

/// The category declared by `T`.
pub type CategoryOf<T> = <T as Categorized>::Category;

/// Name of the category declared by `T`.
pub fn category_of<T: Categorized + ?Sized>() -> &'static str {
    <CategoryOf<T> as Category>::NAME
}

impl<T> Categorized for std::slice::Iter<'_, T> {
    type Category = RandomAccess;
}

impl<T> Categorized for std::slice::IterMut<'_, T> {
    type Category = RandomAccess;
}

impl<T> Categorized for std::vec::IntoIter<T> {
    type Category = RandomAccess;
}

impl<T> Categorized for vec_deque::Iter<'_, T> {
    type Category = RandomAccess;
}

impl<T> Categorized for linked_list::Iter<'_, T> {
    type Category = Bidirectional;
}

impl<T> Categorized for btree_set::Iter<'_, T> {
    type Category = Bidirectional;
}

impl<T> Categorized for hash_set::Iter<'_, T> {
    type Category = Forward;
}

impl<K, V> Categorized for btree_map::Iter<'_, K, V> {
    type Category = Bidirectional;
}

impl<K, V> Categorized for hash_map::Iter<'_, K, V> {
    type Category = Forward;
}

impl Categorized for std::str::Chars<'_> {
    type Category = Bidirectional;
}

impl Categorized for std::ops::Range<usize> {
    type Category = RandomAccess;
}

impl<R> Categorized for std::io::Bytes<R> {
    type Category = Input;
}

impl<T> Categorized for std::sync::mpsc::IntoIter<T> {
    type Category = Input;
}

/// How a category moves an iterator forward.
pub trait Advance<I: Iterator>: Category {
    /// Skip up to `n` elements; returns how many were skipped.
    fn advance(iter: &mut I, n: usize) -> usize;
}

/// How a category steps an iterator back from its end.
pub trait Retreat<I: DoubleEndedIterator>: Refines<Bidirectional> {
    /// Drop up to `n` elements from the back; returns how many were dropped.
    fn advance_back(iter: &mut I, n: usize) -> usize;
}

/// How a category counts an iterator's remaining elements.
pub trait Measure<I: Iterator>: Refines<Forward> {
    /// Remaining elements, without consuming `iter`.
    fn distance(iter: &I) -> usize;
}

fn step<I: Iterator>(iter: &mut I, n: usize) -> usize {
    (0..n).take_while(|_| iter.next().is_some()).count()
}

fn step_back<I: DoubleEndedIterator>(iter: &mut I, n: usize) -> usize {
    (0..n).take_while(|_| iter.next_back().is_some()).count()
}

impl<I: Iterator> Advance<I> for Input {
    fn advance(iter: &mut I, n: usize) -> usize {
        step(iter, n)
    }
}

impl<I: Iterator> Advance<I> for Forward {
    fn advance(iter: &mut I, n: usize) -> usize {
        step(iter, n)
    }
}

impl<I: Iterator> Advance<I> for Bidirectional {
    fn advance(iter: &mut I, n: usize) -> usize {
        step(iter, n)
    }
}

impl<I: ExactSizeIterator> Advance<I> for RandomAccess {
    fn advance(iter: &mut I, n: usize) -> usize {
        let k = n.min(iter.len());
        if k > 0 {
            iter.nth(k - 1);
        }
        k
    }
}

impl<I: DoubleEndedIterator> Retreat<I> for Bidirectional {
    fn advance_back(iter: &mut I, n: usize) -> usize {
        step_back(iter, n)
    }
}

impl<I: DoubleEndedIterator + ExactSizeIterator> Retreat<I> for RandomAccess {
    fn advance_back(iter: &mut I, n: usize) -> usize {
        let k = n.min(iter.len());
        if k > 0 {
            iter.nth_back(k - 1);
        }
        k
    }
}

impl<I: Iterator + Clone> Measure<I> for Forward {
    fn distance(iter: &I) -> usize {
        iter.clone().count()
    }
}

impl<I: Iterator + Clone> Measure<I> for Bidirectional {
    fn distance(iter: &I) -> usize {
        iter.clone().count()
    }
}

impl<I: ExactSizeIterator> Measure<I> for RandomAccess {
    fn distance(iter: &I) -> usize {
        iter.len()
    }
}

/// Skip up to `n` elements: a single jump for random-access iterators,
/// element by element for everything else.
///
/// Returns how many elements were actually skipped.
///
/// # Examples
///
/// ```rust
/// use holdfast::capability;
///
/// let data = [1, 2, 3, 4, 5];
/// let mut iter = data.iter();
/// assert_eq!(capability::advance(&mut iter, 3), 3);
/// assert_eq!(iter.next(), Some(&4));
/// ```
pub fn advance<I>(iter: &mut I, n: usize) -> usize
where
    I: Categorized + Iterator,
    CategoryOf<I>: Advance<I>,
{
    <CategoryOf<I> as Advance<I>>::advance(iter, n)
}

/// Drop up to `n` elements from the back. Requires at least bidirectional
/// traversal.
///
/// # Examples
///
/// ```rust
/// use holdfast::capability;
///
/// let mut chars = "hello".chars();
/// assert_eq!(capability::advance_back(&mut chars, 2), 2);
/// assert_eq!(chars.as_str(), "hel");
/// ```
pub fn advance_back<I>(iter: &mut I, n: usize) -> usize
where
    I: Categorized + DoubleEndedIterator,
    CategoryOf<I>: Retreat<I>,
{
    <CategoryOf<I> as Retreat<I>>::advance_back(iter, n)
}

/// Number of remaining elements, leaving `iter` untouched. Requires at least
/// forward traversal: constant time for random access, a counted replay of
/// a clone otherwise.
///
/// # Examples
///
/// ```rust
/// use holdfast::capability;
/// use std::collections::BTreeSet;
///
/// let set: BTreeSet<_> = (0..10).collect();
/// let iter = set.iter();
/// assert_eq!(capability::distance(&iter), 10);
/// ```
pub fn distance<I>(iter: &I) -> usize
where
    I: Categorized + Iterator,
    CategoryOf<I>: Measure<I>,
{
    <CategoryOf<I> as Measure<I>>::distance(iter)
}
