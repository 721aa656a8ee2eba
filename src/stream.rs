//! Driving `declare` → `fetch`* → `deallocate` over a checked-out connection
//! (spec §4.7, component C7).
//!
//! A [`Stream`] borrows the [`Client`] it's driving for its whole lifetime
//! rather than sharing it behind an `Arc<Mutex<_>>`. That sharing pattern was
//! the first thing tried here, to dodge the self-referential-future problem
//! a literal `futures_core::Stream` impl runs into (the in-flight future has
//! to live across `poll_next` calls while also needing `&mut` access to the
//! struct it's a field of) — but it doesn't compose with
//! [`Client::transaction`]: the closure `transaction` hands its body only
//! ever has bare `&mut Client` access, with nothing else holding the lock,
//! so a second, independent lock attempt from inside that body (to drive the
//! stream) deadlocks against itself. Borrowing instead means every `next()`
//! call is its own complete `async fn` invocation with no state to store
//! across suspension points other than what the borrow checker already
//! tracks, so there's nothing to box and nothing to deadlock on.
//!
//! The cost is dropping literal `futures_core::Stream` trait conformance in
//! favor of a hand-rolled `next(&mut self)`. Any caller that genuinely needs
//! a `Stream` value can still get one with `futures_util::stream::unfold`.

use std::panic::AssertUnwindSafe;

use crate::adapter::Adapter;
use crate::client::{Client, CursorHandle, FetchStep};
use crate::error::{hook_panic, ConnectionError};
use crate::options::{DecodeHook, EncodeHook};
use crate::principal::Principal;

#[derive(Clone, Copy)]
enum State {
    /// Still open; another `next()` call issues `handle_fetch`.
    Open(CursorHandle),
    /// `handle_fetch` returned `halt`, or an error occurred and
    /// `handle_deallocate` already ran; no further calls do anything.
    Done,
}

/// A server-side cursor, declared over `client` and driven one batch at a
/// time by [`Stream::next`].
///
/// Must be opened while `client` is inside a transaction (enforced by
/// [`Client::declare`] itself). [`Client::transaction`] sweeps any cursor
/// left dangling in its body's `Client` when the body returns (spec §4.7:
/// "close always runs, even on partial consumption or an error"), so a
/// caller that stops calling `next()` before it returns `None` — breaking
/// out of a loop early — doesn't leak the server-side cursor.
pub struct Stream<'a, A: Adapter> {
    client: &'a mut Client<A>,
    decode: Option<DecodeHook<A>>,
    state: State,
}

impl<'a, A: Adapter> Stream<'a, A> {
    /// Opens a new cursor. `params` is passed through the encode hook (if
    /// any) before `handle_declare` is issued (spec §4.7 item 5).
    pub async fn open(
        client: &'a mut Client<A>,
        principal: &Principal,
        query: A::Query,
        params: A::Params,
        encode: Option<EncodeHook<A>>,
        decode: Option<DecodeHook<A>>,
    ) -> Result<Stream<'a, A>, ConnectionError<A::Error>> {
        let params = match &encode {
            None => params,
            Some(hook) => {
                let hook = hook.clone();
                let params = AssertUnwindSafe(params);
                std::panic::catch_unwind(AssertUnwindSafe(move || hook(params.0))).map_err(|p| hook_panic::<A::Error>("encode hook", p))?
            }
        };

        let (handle, _query) = client.declare(principal, query, params).await?;
        Ok(Stream {
            client,
            decode,
            state: State::Open(handle),
        })
    }

    /// Fetches and decodes the next batch, or `None` once the cursor has
    /// halted (or already failed/closed). Decoding (and its timing) is
    /// handled inside [`Client::fetch`] so a fetch that runs a decode hook
    /// is logged as a single entry carrying both `connection_time` and
    /// `decode_time`.
    pub async fn next(&mut self, principal: &Principal) -> Option<Result<A::Result, ConnectionError<A::Error>>> {
        let State::Open(handle) = self.state else { return None };

        match self.client.fetch(principal, handle, self.decode.as_ref()).await {
            Ok(FetchStep::Cont(result)) => Some(Ok(result)),
            Ok(FetchStep::Halt(result)) => {
                self.state = State::Done;
                let _ = self.client.deallocate(principal, handle).await;
                Some(Ok(result))
            }
            Err(e) => {
                self.state = State::Done;
                let _ = self.client.deallocate(principal, handle).await;
                Some(Err(e))
            }
        }
    }
}
