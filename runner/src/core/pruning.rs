//! Removal of experiments that already have recorded results.

use anyhow::{Result, anyhow};

use crate::core::types::{ExperimentOutcome, ExperimentSpec, ImplemInfo};

/// Keep the specs whose `(host version, container version)` pair has no
/// match in `existing`. Input order is preserved.
pub fn prune(specs: &[ExperimentSpec], existing: &[ExperimentOutcome]) -> Vec<ExperimentSpec> {
    specs
        .iter()
        .filter(|spec| !is_covered(spec, existing))
        .cloned()
        .collect()
}

/// True if `existing` already holds a result for the spec's version pair.
pub fn is_covered(spec: &ExperimentSpec, existing: &[ExperimentOutcome]) -> bool {
    existing.iter().any(|result| {
        result.host.version == spec.host.version
            && result.container.version == spec.container_implem.version
    })
}

/// Implementation shared by every experiment of a batch.
///
/// All specs are expected to use the same implementation family (see
/// [`foreign_family`]); the first host implementation is returned.
pub fn common_implementation(specs: &[ExperimentSpec]) -> Result<&ImplemInfo> {
    specs
        .first()
        .map(|spec| &spec.host)
        .ok_or_else(|| anyhow!("no experiment"))
}

/// Specs whose host or container implementation differs from `family`.
pub fn foreign_family<'a>(specs: &'a [ExperimentSpec], family: &str) -> Vec<&'a ExperimentSpec> {
    specs
        .iter()
        .filter(|spec| {
            !spec.host.id.eq_ignore_ascii_case(family)
                || !spec.container_implem.id.eq_ignore_ascii_case(family)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{outcome, spec};

    #[test]
    fn keeps_everything_without_results() {
        let specs = vec![spec("OpenMPI", "4.0.0", "4.0.0")];
        assert_eq!(prune(&specs, &[]), specs);
    }

    #[test]
    fn drops_spec_with_matching_pair() {
        let specs = vec![spec("OpenMPI", "4.0.0", "4.0.0")];
        let results = vec![outcome("OpenMPI", "4.0.0", "4.0.0", true)];
        assert!(prune(&specs, &results).is_empty());
    }

    #[test]
    fn both_versions_must_match() {
        let specs = vec![
            spec("OpenMPI", "4.0.0", "3.1.4"),
            spec("OpenMPI", "3.1.4", "4.0.0"),
            spec("OpenMPI", "4.0.0", "4.0.0"),
        ];
        let results = vec![outcome("OpenMPI", "4.0.0", "4.0.0", false)];
        let kept: Vec<_> = prune(&specs, &results)
            .into_iter()
            .map(|s| (s.host.version, s.container_implem.version))
            .collect();
        assert_eq!(
            kept,
            vec![
                ("4.0.0".to_string(), "3.1.4".to_string()),
                ("3.1.4".to_string(), "4.0.0".to_string()),
            ]
        );
    }

    #[test]
    fn pruning_is_idempotent() {
        let specs = vec![
            spec("MPICH", "3.3", "3.3"),
            spec("MPICH", "3.3", "3.2"),
            spec("MPICH", "3.2", "3.2"),
        ];
        let results = vec![outcome("MPICH", "3.3", "3.2", true)];
        let once = prune(&specs, &results);
        assert_eq!(prune(&once, &results), once);
    }

    #[test]
    fn common_implementation_requires_experiments() {
        let err = common_implementation(&[]).unwrap_err();
        assert!(err.to_string().contains("no experiment"));
    }

    #[test]
    fn common_implementation_is_first_host() {
        let specs = vec![spec("OpenMPI", "4.0.0", "4.0.0"), spec("OpenMPI", "3.1.4", "4.0.0")];
        let implem = common_implementation(&specs).expect("implementation");
        assert_eq!(implem.id, "OpenMPI");
        assert_eq!(implem.version, "4.0.0");
    }

    #[test]
    fn foreign_family_flags_mixed_batches() {
        let mut mixed = spec("OpenMPI", "4.0.0", "3.3");
        mixed.container_implem.id = "MPICH".to_string();
        let specs = vec![spec("OpenMPI", "4.0.0", "4.0.0"), mixed];
        let foreign = foreign_family(&specs, "openmpi");
        assert_eq!(foreign.len(), 1);
        assert_eq!(foreign[0].container_implem.id, "MPICH");
    }
}
