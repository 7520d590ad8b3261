use std::str::FromStr;

use serde::{Deserialize, Serialize};

use armada_common::ServiceInstance;

/// How `select_instance` picks among qualifying candidates. Candidates are
/// always presented ordered by instance id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Cycle through candidates using a per-kind counter.
    RoundRobin,
    /// Lowest `current_load`, first by id on ties.
    #[default]
    LeastLoaded,
    /// Highest capability score (free VRAM, model count, idle share).
    CapabilityBased,
}

impl Strategy {
    pub fn name(self) -> &'static str {
        match self {
            Strategy::RoundRobin => "round_robin",
            Strategy::LeastLoaded => "least_loaded",
            Strategy::CapabilityBased => "capability_based",
        }
    }

    /// Index of the chosen candidate. `tick` is the round-robin counter value
    /// for this call and is ignored by the other strategies.
    pub fn select(self, candidates: &[&ServiceInstance], tick: u64) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        match self {
            Strategy::RoundRobin => Some((tick % candidates.len() as u64) as usize),
            Strategy::LeastLoaded => least_loaded(candidates),
            Strategy::CapabilityBased => best_capability(candidates),
        }
    }
}

fn least_loaded(candidates: &[&ServiceInstance]) -> Option<usize> {
    let mut best_idx: Option<usize> = None;
    let mut best_load = f64::INFINITY;

    for (i, c) in candidates.iter().enumerate() {
        if c.current_load < best_load {
            best_load = c.current_load;
            best_idx = Some(i);
        }
    }

    best_idx.or(Some(0))
}

pub fn capability_score(instance: &ServiceInstance) -> f64 {
    instance.free_vram_mb() as f64 / 1000.0
        + f64::from(instance.capabilities.model_count) * 10.0
        + (1.0 - instance.current_load) * 50.0
}

fn best_capability(candidates: &[&ServiceInstance]) -> Option<usize> {
    let mut best_idx: Option<usize> = None;
    let mut best_score = f64::NEG_INFINITY;

    for (i, c) in candidates.iter().enumerate() {
        let score = capability_score(c);
        if score > best_score {
            best_score = score;
            best_idx = Some(i);
        }
    }

    best_idx
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "round_robin" | "round-robin" => Ok(Strategy::RoundRobin),
            "least_loaded" | "least-loaded" => Ok(Strategy::LeastLoaded),
            "capability_based" | "capability-based" => Ok(Strategy::CapabilityBased),
            other => Err(format!(
                "unknown selection strategy '{}', available: round_robin, least_loaded, capability_based",
                other
            )),
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_common::{ServiceCapabilities, ServiceKind};

    fn make_inst(port: u16, load: f64, models: usize, free_vram_mb: Option<u64>) -> ServiceInstance {
        let mut inst = ServiceInstance::new(ServiceKind::Ollama, "10.0.0.1", port);
        inst.current_load = load;
        inst.capabilities = ServiceCapabilities::with_models((0..models).map(|i| format!("m{i}")).collect());
        inst.capabilities.vram_free_mb = free_vram_mb;
        inst
    }

    #[test]
    fn test_least_loaded() {
        let a = make_inst(1, 0.7, 0, None);
        let b = make_inst(2, 0.1, 0, None);
        let c = make_inst(3, 0.1, 0, None);
        assert_eq!(Strategy::LeastLoaded.select(&[&a, &b, &c], 0), Some(1));
    }

    #[test]
    fn test_capability_prefers_more_models_and_less_load() {
        let many = make_inst(1, 0.2, 3, None);
        let few = make_inst(2, 0.9, 1, None);
        assert_eq!(Strategy::CapabilityBased.select(&[&few, &many], 0), Some(1));
        assert!((capability_score(&many) - 70.0).abs() < 1e-9);
    }

    #[test]
    fn test_capability_counts_free_vram() {
        let big = make_inst(1, 0.5, 1, Some(20_000));
        let small = make_inst(2, 0.5, 1, Some(2_000));
        assert_eq!(Strategy::CapabilityBased.select(&[&small, &big], 0), Some(1));
    }

    #[test]
    fn test_round_robin_wraps() {
        let a = make_inst(1, 0.0, 0, None);
        let b = make_inst(2, 0.0, 0, None);
        let picks: Vec<_> = (0..4).map(|t| Strategy::RoundRobin.select(&[&a, &b], t)).collect();
        assert_eq!(picks, vec![Some(0), Some(1), Some(0), Some(1)]);
    }

    #[test]
    fn test_empty_candidates() {
        for s in [Strategy::RoundRobin, Strategy::LeastLoaded, Strategy::CapabilityBased] {
            assert_eq!(s.select(&[], 3), None);
        }
    }

    #[test]
    fn test_parse_strategy() {
        assert_eq!("round_robin".parse::<Strategy>(), Ok(Strategy::RoundRobin));
        assert_eq!("capability-based".parse::<Strategy>(), Ok(Strategy::CapabilityBased));
        assert!("random".parse::<Strategy>().unwrap_err().contains("available"));
    }
}
