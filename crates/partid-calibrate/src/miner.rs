// crates/partid-calibrate/src/miner.rs
//
// Hard-Case Miner: remembers entry pairs the engine confuses.
//
// Templates are keyed by the unordered pair (stored smaller key first). The
// miner only records; it never retrains anything. The matcher reads it back
// through `HardPairOracle` to bias its ambiguity gate.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use partid_core::{EntryKey, HardPairOracle, HardTemplate, MatchOutcome};

/// Miner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinerConfig {
    /// Margins below this are recorded. Lower than the gate threshold.
    #[serde(default = "default_mining_threshold")]
    pub mining_threshold: f32,
    /// Example observation ids kept per template.
    #[serde(default = "default_max_examples")]
    pub max_examples: usize,
    /// Templates kept in total; the least recently seen are evicted.
    #[serde(default = "default_max_templates")]
    pub max_templates: usize,
    /// Observations before a pair biases the gate.
    #[serde(default = "default_hard_pair_min_observations")]
    pub hard_pair_min_observations: u64,
}

fn default_mining_threshold() -> f32 {
    0.02
}

fn default_max_examples() -> usize {
    16
}

fn default_max_templates() -> usize {
    10_000
}

fn default_hard_pair_min_observations() -> u64 {
    3
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            mining_threshold: default_mining_threshold(),
            max_examples: default_max_examples(),
            max_templates: default_max_templates(),
            hard_pair_min_observations: default_hard_pair_min_observations(),
        }
    }
}

type PairKey = (EntryKey, EntryKey);

fn pair_key(a: &EntryKey, b: &EntryKey) -> PairKey {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

#[derive(Debug, Default)]
pub struct HardCaseMiner {
    config: MinerConfig,
    templates: RwLock<HashMap<PairKey, HardTemplate>>,
}

impl HardCaseMiner {
    pub fn new(config: MinerConfig) -> Self {
        Self {
            config,
            templates: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &MinerConfig {
        &self.config
    }

    /// Record a low-margin top-1/top-2 pair from a resolved query.
    pub fn observe_match(&self, outcome: &MatchOutcome) -> bool {
        let (Some(first), Some(second)) = (outcome.candidates.first(), outcome.candidates.get(1))
        else {
            return false;
        };
        let margin = first.fused_score - second.fused_score;
        if margin >= self.config.mining_threshold {
            return false;
        }
        self.record(&first.key, &second.key, margin, &outcome.observation_id, Utc::now());
        true
    }

    /// Record a low-confidence resolution: the committed entry differs from
    /// the query's top-1 by less than the mining threshold.
    pub fn observe_resolution(&self, outcome: &MatchOutcome, committed: &EntryKey) -> bool {
        let Some(top) = outcome.candidates.first() else {
            return false;
        };
        if &top.key == committed {
            return false;
        }
        let Some(chosen) = outcome.candidates.iter().find(|c| &c.key == committed) else {
            return false;
        };
        let gap = top.fused_score - chosen.fused_score;
        if gap >= self.config.mining_threshold {
            return false;
        }
        self.record(&top.key, committed, gap, &outcome.observation_id, Utc::now());
        true
    }

    /// Insert or update the template for the unordered pair `(a, b)`.
    pub fn record(
        &self,
        a: &EntryKey,
        b: &EntryKey,
        margin: f32,
        observation_id: &str,
        now: DateTime<Utc>,
    ) {
        if a == b {
            return;
        }
        let key = pair_key(a, b);
        let mut templates = self.templates.write().unwrap_or_else(|e| e.into_inner());

        match templates.get_mut(&key) {
            Some(t) => {
                t.observations += 1;
                t.observed_margin = margin;
                t.min_margin = t.min_margin.min(margin);
                t.last_seen = now;
                if t.example_refs.len() < self.config.max_examples
                    && !t.example_refs.iter().any(|r| r == observation_id)
                {
                    t.example_refs.push(observation_id.to_string());
                }
            }
            None => {
                if templates.len() >= self.config.max_templates {
                    let oldest = templates
                        .iter()
                        .min_by(|x, y| x.1.last_seen.cmp(&y.1.last_seen).then_with(|| x.0.cmp(y.0)))
                        .map(|(k, _)| k.clone());
                    if let Some(oldest) = oldest {
                        templates.remove(&oldest);
                    }
                }
                tracing::debug!(a = %key.0, b = %key.1, margin, "New hard template");
                let mut example_refs = Vec::new();
                if self.config.max_examples > 0 {
                    example_refs.push(observation_id.to_string());
                }
                templates.insert(
                    key.clone(),
                    HardTemplate {
                        entry_a: key.0,
                        entry_b: key.1,
                        observed_margin: margin,
                        min_margin: margin,
                        observations: 1,
                        example_refs,
                        first_seen: now,
                        last_seen: now,
                    },
                );
            }
        }
    }

    /// All templates, most observed first, then smallest margin.
    pub fn templates(&self) -> Vec<HardTemplate> {
        let templates = self.templates.read().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<HardTemplate> = templates.values().cloned().collect();
        out.sort_by(|x, y| {
            y.observations
                .cmp(&x.observations)
                .then_with(|| {
                    x.min_margin
                        .partial_cmp(&y.min_margin)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| x.entry_a.cmp(&y.entry_a))
                .then_with(|| x.entry_b.cmp(&y.entry_b))
        });
        out
    }

    pub fn len(&self) -> usize {
        self.templates.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `(a, b)` has been seen at least `min_observations` times.
    pub fn is_hard_pair_with(&self, a: &EntryKey, b: &EntryKey, min_observations: u64) -> bool {
        self.templates
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&pair_key(a, b))
            .is_some_and(|t| t.observations >= min_observations)
    }
}

impl HardPairOracle for HardCaseMiner {
    fn is_hard_pair(&self, a: &EntryKey, b: &EntryKey) -> bool {
        self.is_hard_pair_with(a, b, self.config.hard_pair_min_observations)
    }
}
