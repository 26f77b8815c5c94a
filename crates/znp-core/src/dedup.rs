//! Listener spec de-duplication
//!
//! A listener built from overlapping specs must still react once per frame.
//! [`deduplicate`] keeps only the maximal specs under the subsumption order.

use crate::command::MatchSpec;
use crate::errors::{ZnpError, ZnpResult};

/// Collapse redundant specs, preserving first-seen order
///
/// A spec already covered by an accumulated spec is dropped. A spec that
/// covers accumulated specs takes the position of the first one it covers and
/// evicts the rest, so no element of the result subsumes another.
pub fn deduplicate<I>(specs: I) -> ZnpResult<Vec<MatchSpec>>
where
    I: IntoIterator<Item = MatchSpec>,
{
    let mut maximal: Vec<MatchSpec> = Vec::new();

    for spec in specs {
        if maximal.iter().any(|kept| kept.subsumes(&spec)) {
            continue;
        }

        match maximal.iter().position(|kept| spec.subsumes(kept)) {
            Some(first) => {
                let mut index = 0;
                maximal.retain(|kept| {
                    let keep = index <= first || !spec.subsumes(kept);
                    index += 1;
                    keep
                });
                maximal[first] = spec;
            }
            None => maximal.push(spec),
        }
    }

    if maximal.is_empty() {
        return Err(ZnpError::config_error(
            "a listener must match at least one command",
        ));
    }

    Ok(maximal)
}
