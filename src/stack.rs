//! Stack growth for deep recursion.
//!
//! The parser, resolver and evaluator recurse once per nesting level of the program, so deeply
//! nested source or deep recursion in a script would overflow the native stack.  Wrapping the
//! recursive entry points with [`ensure_sufficient_stack`] moves the recursion onto a freshly
//! allocated segment when the current one runs low.

/// Grow the stack when less than this remains.
const RED_ZONE: usize = 100 * 1024;

/// Size of each freshly allocated stack segment.
const STACK_PER_RECURSION: usize = 1024 * 1024;

#[inline]
pub fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}
