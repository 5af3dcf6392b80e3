use super::CandidateResult;

/// Position of the fastest viable candidate.
///
/// Ties on latency go to the candidate emitted first. Returns `None` when no candidate is viable.
pub fn select<A, K>(results: &[CandidateResult<A, K>]) -> Option<usize> {
    results
        .iter()
        .enumerate()
        .filter(|(_, result)| result.is_viable())
        .min_by_key(|(_, result)| (result.latency, result.index))
        .map(|(position, _)| position)
}

/// Position of the first viable candidate in emission order.
pub fn top1<A, K>(results: &[CandidateResult<A, K>]) -> Option<usize> {
    results
        .iter()
        .enumerate()
        .filter(|(_, result)| result.is_viable())
        .min_by_key(|(_, result)| result.index)
        .map(|(position, _)| position)
}
