//! Command matching
//!
//! Pure predicates over [`MatchSpec`]s: whether a spec accepts a concrete
//! command, and whether one spec is at least as general as another. The
//! second relation is a partial order used to collapse redundant specs.

use crate::command::{Command, MatchSpec};

/// Whether `command` satisfies `spec`
///
/// Headers must be equal and every constrained field must equal the
/// command's value. Unconstrained fields never affect the result.
pub fn matches(spec: &MatchSpec, command: &Command) -> bool {
    spec.header() == command.header()
        && spec
            .constraints()
            .iter()
            .zip(command.values())
            .all(|(constraint, value)| constraint.as_ref().map_or(true, |c| c == value))
}

/// Whether every command matched by `b` is also matched by `a`
///
/// Holds when the headers are equal and each constraint of `a` also appears,
/// with the same value, in `b`.
pub fn subsumes(a: &MatchSpec, b: &MatchSpec) -> bool {
    a.header() == b.header()
        && a
            .constraints()
            .iter()
            .zip(b.constraints())
            .all(|(general, specific)| match (general, specific) {
                (None, _) => true,
                (Some(expected), Some(actual)) => expected == actual,
                (Some(_), None) => false,
            })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{af, zdo};
    use crate::schema::FieldValue;

    fn confirm(status: u8, endpoint: u8, tsn: u8) -> Command {
        Command::new(
            &af::DATA_CONFIRM,
            [
                ("Status", FieldValue::U8(status)),
                ("Endpoint", FieldValue::U8(endpoint)),
                ("TSN", FieldValue::U8(tsn)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_unconstrained_spec_matches_any_instance() {
        let spec = MatchSpec::any(&af::DATA_CONFIRM);
        assert!(matches(&spec, &confirm(0, 1, 2)));
        assert!(matches(&spec, &confirm(0xCD, 8, 200)));
    }

    #[test]
    fn test_constraints_must_all_agree() {
        let spec = MatchSpec::any(&af::DATA_CONFIRM)
            .with("Endpoint", 1u8)
            .unwrap()
            .with("TSN", 2u8)
            .unwrap();

        assert!(matches(&spec, &confirm(0, 1, 2)));
        assert!(!matches(&spec, &confirm(0, 1, 3)));
        assert!(!matches(&spec, &confirm(0, 2, 2)));
    }

    #[test]
    fn test_header_mismatch_never_matches() {
        let spec = MatchSpec::any(&zdo::STATE_CHANGE_IND);
        assert!(!matches(&spec, &confirm(0, 1, 2)));
    }

    #[test]
    fn test_subsumption_is_reflexive_and_ordered() {
        let general = MatchSpec::any(&af::DATA_CONFIRM);
        let specific = general.clone().with("TSN", 9u8).unwrap();

        assert!(subsumes(&general, &general));
        assert!(subsumes(&specific, &specific));
        assert!(subsumes(&general, &specific));
        assert!(!subsumes(&specific, &general));
    }

    #[test]
    fn test_unrelated_specs_are_incomparable() {
        let by_tsn = MatchSpec::any(&af::DATA_CONFIRM).with("TSN", 9u8).unwrap();
        let by_endpoint = MatchSpec::any(&af::DATA_CONFIRM)
            .with("Endpoint", 1u8)
            .unwrap();
        let other_tsn = MatchSpec::any(&af::DATA_CONFIRM).with("TSN", 10u8).unwrap();

        assert!(!subsumes(&by_tsn, &by_endpoint));
        assert!(!subsumes(&by_endpoint, &by_tsn));
        assert!(!subsumes(&by_tsn, &other_tsn));
    }

    #[test]
    fn test_full_command_spec_only_matches_itself() {
        let command = confirm(0, 1, 2);
        let spec = MatchSpec::from(&command);

        assert!(matches(&spec, &command));
        assert!(!matches(&spec, &confirm(1, 1, 2)));
        assert!(subsumes(&MatchSpec::any(&af::DATA_CONFIRM), &spec));
    }
}
