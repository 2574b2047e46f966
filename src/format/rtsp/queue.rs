use super::request::PendingRequest;
use log::warn;
use std::collections::VecDeque;

/// Default bound on requests awaiting a response.
pub const DEFAULT_MAX_PENDING: usize = 64;

/// Outcome of matching one response against the queue.
#[derive(Debug, Default)]
pub struct Resolution {
    /// The request the response answers.
    pub matched: Option<PendingRequest>,
    /// Requests the server skipped; they will never be answered.
    pub abandoned: Vec<PendingRequest>,
}

/// In-flight requests in send order. CSeq values increase strictly from
/// head to tail.
#[derive(Debug)]
pub struct CorrelationQueue {
    entries: VecDeque<PendingRequest>,
    max_depth: usize,
}

impl Default for CorrelationQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING)
    }
}

impl CorrelationQueue {
    /// Creates a queue holding at most `max_depth` requests.
    pub fn new(max_depth: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_depth: max_depth.max(1),
        }
    }

    /// Number of requests waiting for a response.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends a sent request. When the queue is full the oldest entry is
    /// evicted and returned so its handler can be told.
    pub fn enqueue(&mut self, request: PendingRequest) -> Option<PendingRequest> {
        debug_assert!(self
            .entries
            .back()
            .map_or(true, |last| last.cseq < request.cseq));
        self.entries.push_back(request);
        if self.entries.len() > self.max_depth {
            let evicted = self.entries.pop_front();
            if let Some(ref request) = evicted {
                warn!(
                    "Correlation queue full, abandoning {} (CSeq {})",
                    request.command, request.cseq
                );
            }
            return evicted;
        }
        None
    }

    /// Finds the request a response belongs to.
    ///
    /// Every entry with CSeq up to `cseq` is removed; the last of them is
    /// the match and the rest are abandoned. If no entry qualifies, or the
    /// response carried no CSeq, the oldest entry is taken instead.
    pub fn resolve(&mut self, cseq: Option<u32>) -> Resolution {
        let Some(cseq) = cseq else {
            return Resolution {
                matched: self.entries.pop_front(),
                abandoned: Vec::new(),
            };
        };

        let covered = self.entries.iter().take_while(|r| r.cseq <= cseq).count();
        if covered == 0 {
            return Resolution {
                matched: self.entries.pop_front(),
                abandoned: Vec::new(),
            };
        }

        let mut abandoned: Vec<_> = self.entries.drain(..covered).collect();
        let matched = abandoned.pop();
        for request in &abandoned {
            warn!(
                "No response to {} (CSeq {}) before CSeq {}",
                request.command, request.cseq, cseq
            );
        }
        Resolution { matched, abandoned }
    }

    /// Removes every waiting request, oldest first.
    pub fn drain(&mut self) -> Vec<PendingRequest> {
        self.entries.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::rtsp::request::{Command, ResponseHandler};
    use pretty_assertions::assert_eq;
    use quickcheck_macros::quickcheck;

    fn sent(cseq: u32) -> PendingRequest {
        let mut request = PendingRequest::new(Command::Options, ResponseHandler::Ignore);
        request.cseq = cseq;
        request
    }

    fn queue_of(cseqs: &[u32]) -> CorrelationQueue {
        let mut queue = CorrelationQueue::default();
        for &cseq in cseqs {
            queue.enqueue(sent(cseq));
        }
        queue
    }

    #[test]
    fn test_exact_match() {
        let mut queue = queue_of(&[1, 2, 3]);
        let resolution = queue.resolve(Some(1));
        assert_eq!(resolution.matched.map(|r| r.cseq), Some(1));
        assert!(resolution.abandoned.is_empty());
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_skipped_requests_are_abandoned() {
        let mut queue = queue_of(&[1, 2, 3, 4]);
        let resolution = queue.resolve(Some(3));
        assert_eq!(resolution.matched.map(|r| r.cseq), Some(3));
        let abandoned: Vec<u32> = resolution.abandoned.iter().map(|r| r.cseq).collect();
        assert_eq!(abandoned, vec![1, 2]);

        // a late response for an abandoned request falls back to the oldest entry
        let resolution = queue.resolve(Some(1));
        assert_eq!(resolution.matched.map(|r| r.cseq), Some(4));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_missing_cseq_is_fifo() {
        let mut queue = queue_of(&[5, 6]);
        assert_eq!(queue.resolve(None).matched.map(|r| r.cseq), Some(5));
        assert_eq!(queue.resolve(None).matched.map(|r| r.cseq), Some(6));
        assert!(queue.resolve(None).matched.is_none());
    }

    #[test]
    fn test_depth_bound_evicts_oldest() {
        let mut queue = CorrelationQueue::new(2);
        assert!(queue.enqueue(sent(1)).is_none());
        assert!(queue.enqueue(sent(2)).is_none());
        assert_eq!(queue.enqueue(sent(3)).map(|r| r.cseq), Some(1));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_drain() {
        let mut queue = queue_of(&[1, 2, 3]);
        assert_eq!(queue.drain().len(), 3);
        assert!(queue.is_empty());
    }

    #[quickcheck]
    fn prop_match_is_largest_cseq_not_above_response(count: u8, response: u8) -> bool {
        let count = (count % 32) as u32;
        let response = response as u32 % 40 + 1;
        let cseqs: Vec<u32> = (1..=count).collect();
        let mut queue = queue_of(&cseqs);
        let resolution = queue.resolve(Some(response));

        let expected = cseqs.iter().copied().filter(|&c| c <= response).max();
        match expected {
            Some(expected) => {
                resolution.matched.map(|r| r.cseq) == Some(expected)
                    && resolution.abandoned.iter().all(|r| r.cseq < expected)
                    && resolution.abandoned.len() as u32 == expected - 1
                    && queue.len() as u32 == count - expected
            }
            None => resolution.matched.map(|r| r.cseq) == cseqs.first().copied(),
        }
    }
}
