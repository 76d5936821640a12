//! Match type filtering over search results.

use matchlobby_wire::SessionSearchResult;

/// First result (in provider order) advertising `match_type`.
///
/// Linear scan, first match wins. Results without a match type never match.
pub fn find_match<'a>(
    results: &'a [SessionSearchResult],
    match_type: &str,
) -> Option<&'a SessionSearchResult> {
    results
        .iter()
        .find(|result| result.match_type() == Some(match_type))
}
