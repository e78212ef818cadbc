//! Stock handlers for the failure modes of iterative field solvers.
//!
//! Each handler escalates through remedy tiers selected by its ledger count.
//! Every applied correction increments the ledger, including the terminal
//! tier, so an exhausted handler is always detectable after a restart.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::control::ControlStore;

use super::{ErrorHandler, HandlerRegistry};

/// The prior-state file a warm restart resumes from.
const STATE_FILE: &str = "state.bin";

// Cached intermediates that poison a clean start once mixing has diverged.
const CACHED_INTERMEDIATES: &[&str] = &["density.bin", "wavefunctions.bin"];

/// Divergence of the self-consistent mixing loop.
///
/// The ladder starts with the mildest retry (warm restart) and escalates to
/// structural fixes: damped mixing, grid re-centering, and finally disabling
/// symmetry while deleting stale cached intermediates.
pub struct MixingDivergence;

impl ErrorHandler for MixingDivergence {
    fn name(&self) -> &'static str {
        "mixing"
    }

    fn watch_file(&self) -> &str {
        "solver.out"
    }

    fn signatures(&self) -> &[&str] {
        &["SCF mixing diverged"]
    }

    fn max_attempts(&self) -> u32 {
        5
    }

    fn correct(&self, store: &mut ControlStore, dir: &Path) -> Result<String> {
        let mut count = store.error_count(self.name());

        // Without a usable prior state there is nothing to warm-restart
        // from; burn tier 0 and move straight to the next rung.
        if count == 0 && !dir.join(STATE_FILE).exists() {
            store.increment_error_count(self.name());
            count = 1;
        }

        let grid_centered = store.get_bool("grid_centered", true);
        let description = match count {
            0 => {
                store.set("restart_mode", "warm");
                "switched restart_mode to warm".to_string()
            }
            1 => {
                store.set("mixing_scheme", "kerker");
                "switched mixing_scheme to kerker".to_string()
            }
            2 if grid_centered => {
                store.set("grid_centered", false);
                store.remove("mixing_scheme");
                "removed mixing_scheme and disabled grid centering".to_string()
            }
            2 | 3 if !grid_centered => {
                store.set("grid_centered", true);
                store.remove("mixing_scheme");
                "removed mixing_scheme and re-enabled grid centering".to_string()
            }
            _ => {
                store.set("symmetry", false);
                store.set("grid_centered", true);
                for name in CACHED_INTERMEDIATES {
                    let path = dir.join(name);
                    if path.exists() {
                        std::fs::remove_file(&path)?;
                    }
                }
                "disabled symmetry, forced centered grid, deleted cached intermediates"
                    .to_string()
            }
        };

        store.increment_error_count(self.name());
        Ok(description)
    }
}

/// A symmetry operation the solver cannot reproduce; the only fix is to turn
/// symmetry detection off.
pub struct SymmetryFailure;

impl ErrorHandler for SymmetryFailure {
    fn name(&self) -> &'static str {
        "symmetry"
    }

    fn watch_file(&self) -> &str {
        "solver.out"
    }

    fn signatures(&self) -> &[&str] {
        &["symmetry group operation missing"]
    }

    fn max_attempts(&self) -> u32 {
        1
    }

    fn correct(&self, store: &mut ControlStore, _dir: &Path) -> Result<String> {
        store.set("symmetry", false);
        store.increment_error_count(self.name());
        Ok("switched symmetry to false".to_string())
    }
}

/// Subspace rotation failure in the iterative diagonalizer; fall back to the
/// standard algorithm.
pub struct SubspaceRotation;

impl ErrorHandler for SubspaceRotation {
    fn name(&self) -> &'static str {
        "subspace_rotation"
    }

    fn watch_file(&self) -> &str {
        "solver.out"
    }

    fn signatures(&self) -> &[&str] {
        &["subspace rotation failed to converge"]
    }

    fn max_attempts(&self) -> u32 {
        1
    }

    fn correct(&self, store: &mut ControlStore, _dir: &Path) -> Result<String> {
        store.set("diagonalization", "standard");
        store.increment_error_count(self.name());
        Ok("switched diagonalization to standard".to_string())
    }
}

/// The run finished its step budget without converging. Only meaningful on a
/// finished run, so this one is post-mortem.
pub struct Unconverged;

impl ErrorHandler for Unconverged {
    fn name(&self) -> &'static str {
        "unconverged"
    }

    fn watch_file(&self) -> &str {
        "solver.out"
    }

    fn signatures(&self) -> &[&str] {
        &["maximum steps reached without convergence"]
    }

    fn is_live_monitor(&self) -> bool {
        false
    }

    fn max_attempts(&self) -> u32 {
        2
    }

    fn correct(&self, store: &mut ControlStore, _dir: &Path) -> Result<String> {
        let steps = store.get_i64("max_steps", 100);
        let doubled = steps.saturating_mul(2);
        store.set("max_steps", doubled);
        store.increment_error_count(self.name());
        Ok(format!("raised max_steps from {steps} to {doubled}"))
    }
}

/// The stock registry, in priority order.
pub fn stock_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(MixingDivergence));
    registry.register(Arc::new(SymmetryFailure));
    registry.register(Arc::new(SubspaceRotation));
    registry.register(Arc::new(Unconverged));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> ControlStore {
        ControlStore::load(dir.path()).unwrap()
    }

    #[test]
    fn mixing_walks_the_full_ladder() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(STATE_FILE), "prior state").unwrap();
        let mut store = store_in(&tmp);
        let handler = MixingDivergence;

        // Tier 0: warm restart.
        handler.correct(&mut store, tmp.path()).unwrap();
        assert_eq!(store.get_str("restart_mode", ""), "warm");
        assert_eq!(store.error_count("mixing"), 1);

        // Tier 1: damped mixing.
        handler.correct(&mut store, tmp.path()).unwrap();
        assert_eq!(store.get_str("mixing_scheme", ""), "kerker");
        assert_eq!(store.error_count("mixing"), 2);

        // Tier 2: grid centering off, damping dropped.
        handler.correct(&mut store, tmp.path()).unwrap();
        assert!(!store.get_bool("grid_centered", true));
        assert!(store.get("mixing_scheme").is_none());
        assert_eq!(store.error_count("mixing"), 3);

        // Tier 3: centering back on.
        handler.correct(&mut store, tmp.path()).unwrap();
        assert!(store.get_bool("grid_centered", false));
        assert_eq!(store.error_count("mixing"), 4);

        // Terminal tier: symmetry off, caches deleted.
        fs::write(tmp.path().join("density.bin"), "stale").unwrap();
        fs::write(tmp.path().join("wavefunctions.bin"), "stale").unwrap();
        handler.correct(&mut store, tmp.path()).unwrap();
        assert!(!store.get_bool("symmetry", true));
        assert!(!tmp.path().join("density.bin").exists());
        assert!(!tmp.path().join("wavefunctions.bin").exists());
        // The terminal tier still increments, so the exhaustion bound is
        // reached and a further match is fatal.
        assert_eq!(store.error_count("mixing"), 5);
        assert_eq!(store.error_count("mixing"), MixingDivergence.max_attempts());
    }

    #[test]
    fn mixing_skips_warm_restart_without_prior_state() {
        let tmp = TempDir::new().unwrap();
        let mut store = store_in(&tmp);
        let handler = MixingDivergence;

        let description = handler.correct(&mut store, tmp.path()).unwrap();
        // Tier 0 was burned, tier 1 applied.
        assert_eq!(description, "switched mixing_scheme to kerker");
        assert!(store.get("restart_mode").is_none());
        assert_eq!(store.error_count("mixing"), 2);
    }

    #[test]
    fn symmetry_is_a_single_shot_fix() {
        let tmp = TempDir::new().unwrap();
        let mut store = store_in(&tmp);
        let handler = SymmetryFailure;

        let description = handler.correct(&mut store, tmp.path()).unwrap();
        assert_eq!(description, "switched symmetry to false");
        assert!(!store.get_bool("symmetry", true));
        assert_eq!(store.error_count("symmetry"), 1);
        assert_eq!(store.error_count("symmetry"), SymmetryFailure.max_attempts());
    }

    #[test]
    fn unconverged_doubles_the_step_budget() {
        let tmp = TempDir::new().unwrap();
        let mut store = store_in(&tmp);
        store.set("max_steps", 150);
        let handler = Unconverged;

        assert!(!handler.is_live_monitor());
        let description = handler.correct(&mut store, tmp.path()).unwrap();
        assert_eq!(description, "raised max_steps from 150 to 300");
        assert_eq!(store.get_i64("max_steps", 0), 300);
    }

    #[test]
    fn stock_registry_priority_order() {
        let registry = stock_registry();
        let names: Vec<&str> = registry.iter().map(|h| h.name()).collect();
        assert_eq!(
            names,
            vec!["mixing", "symmetry", "subspace_rotation", "unconverged"]
        );
    }
}
