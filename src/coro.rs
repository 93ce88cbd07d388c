//! Scheduling points for long-running work.
//!
//! Parsing and compiling a large module can take a while, so both are written
//! as futures that periodically hand control back to whatever executor is
//! driving them. Standalone callers use `futures::executor::block_on`, for
//! which a yield is just another trip round the poll loop.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Give up the CPU if the executor wants it.
pub async fn maybe_yield() {
    struct YieldNow {
        yielded: bool,
    }

    impl Future for YieldNow {
        type Output = ();

        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
            if self.yielded {
                return Poll::Ready(());
            }
            self.yielded = true;
            // reschedule straight away, we only want to be polled again later
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }

    YieldNow { yielded: false }.await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use futures::task::noop_waker;

    #[test]
    fn test_yields_once() {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut fut = Box::pin(maybe_yield());

        assert!(fut.as_mut().poll(&mut cx).is_pending());
        assert!(fut.as_mut().poll(&mut cx).is_ready());
    }

    #[test]
    fn test_multiple_yields() {
        let n = 10;
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut fut = Box::pin(async move {
            for _ in 0..n {
                maybe_yield().await;
            }
            n
        });

        for _ in 0..n {
            assert!(fut.as_mut().poll(&mut cx).is_pending());
        }
        assert_eq!(fut.as_mut().poll(&mut cx), Poll::Ready(n));
    }

    #[test]
    fn test_block_on_drives_to_completion() {
        let result = block_on(async {
            maybe_yield().await;
            maybe_yield().await;
            42
        });
        assert_eq!(result, 42);
    }
}
