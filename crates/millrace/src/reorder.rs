use crate::{Job, JobId, JobResult};
use futures::{Stream, ready};
use pin_project_lite::pin_project;
use std::{
    collections::BTreeMap,
    pin::Pin,
    task::{Context, Poll},
};

/// Items that carry the [`JobId`] they were submitted under.
pub trait Sequenced {
    fn sequence(&self) -> JobId;
}

impl<O, E> Sequenced for JobResult<O, E> {
    fn sequence(&self) -> JobId {
        self.id
    }
}

impl<P> Sequenced for Job<P> {
    fn sequence(&self) -> JobId {
        self.id
    }
}

pin_project! {
    /// A stream adaptor that releases items strictly in [`JobId`] order.
    ///
    /// Items that arrive ahead of the next expected id are held back until the
    /// gap is filled. Memory use therefore grows with the largest
    /// out-of-order distance seen.
    ///
    /// If the inner stream ends while gaps remain (a cancelled run), the held
    /// items are released in ascending id order.
    #[must_use = "streams do nothing unless polled"]
    pub struct Reorder<S>
    where
        S: Stream,
    {
        #[pin]
        inner: S,
        next: JobId,
        pending: BTreeMap<JobId, S::Item>,
        exhausted: bool,
    }
}

impl<S> Reorder<S>
where
    S: Stream,
    S::Item: Sequenced,
{
    /// Reorders `inner`, expecting ids to start at 0.
    pub fn new(inner: S) -> Self {
        Self::starting_at(inner, JobId::default())
    }

    /// Reorders `inner`, expecting `first` as the first id.
    pub fn starting_at(inner: S, first: JobId) -> Self {
        Self {
            inner,
            next: first,
            pending: BTreeMap::new(),
            exhausted: false,
        }
    }

    /// Number of items currently held back waiting for an earlier id.
    pub fn held(&self) -> usize {
        self.pending.len()
    }

    /// The id that will be released next.
    pub const fn next_expected(&self) -> JobId {
        self.next
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }
}

impl<S> Stream for Reorder<S>
where
    S: Stream,
    S::Item: Sequenced,
{
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(item) = this.pending.remove(&*this.next) {
                *this.next = this.next.next();
                return Poll::Ready(Some(item));
            }

            if *this.exhausted {
                // Gaps will never be filled; flush what is left in id order.
                return Poll::Ready(this.pending.pop_first().map(|(id, item)| {
                    *this.next = id.next();
                    item
                }));
            }

            match ready!(this.inner.as_mut().poll_next(cx)) {
                Some(item) => {
                    let id = item.sequence();
                    if id == *this.next {
                        *this.next = id.next();
                        return Poll::Ready(Some(item));
                    }
                    if id < *this.next {
                        // Already past this id; holding it would stall forever.
                        return Poll::Ready(Some(item));
                    }
                    this.pending.insert(id, item);
                }
                None => *this.exhausted = true,
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        // Held items are always released eventually, if need be by the flush.
        let (lower, upper) = self.inner.size_hint();
        let held = self.pending.len();
        (
            lower.saturating_add(held),
            upper.and_then(|u| u.checked_add(held)),
        )
    }
}
