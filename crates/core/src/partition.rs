//! Work partitioning across forwarders.
//!
//! Units are dealt out as contiguous ranges so a forwarder always receives adjacent
//! rafts. Both input orders are preserved and the result depends only on the inputs.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from [`partition`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PartitionError {
    #[error("cannot partition {units} units across zero workers")]
    InvalidInput { units: usize },
}

/// A raft and the CCDs read out through it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftUnit {
    pub raft: String,
    pub ccds: Vec<String>,
}

impl RaftUnit {
    pub fn new(raft: impl Into<String>, ccds: Vec<String>) -> Self {
        Self {
            raft: raft.into(),
            ccds,
        }
    }

    /// CCD unit ids (`<raft>/<ccd>`) covered by this raft.
    pub fn unit_ids(&self) -> Vec<String> {
        self.ccds.iter().map(|ccd| unit_id(&self.raft, ccd)).collect()
    }
}

/// Identifier used for per-CCD results and backlog entries.
pub fn unit_id(raft: &str, ccd: &str) -> String {
    format!("{}/{}", raft, ccd)
}

/// Regroup CCD unit ids into rafts, keeping first-seen raft order. Ids without a
/// `/` are treated as a raft with no CCD suffix.
pub fn rafts_from_unit_ids(ids: &[String]) -> Vec<RaftUnit> {
    let mut rafts: Vec<RaftUnit> = Vec::new();
    for id in ids {
        let (raft, ccd) = id.split_once('/').unwrap_or((id.as_str(), ""));
        match rafts.iter_mut().find(|r| r.raft == raft) {
            Some(unit) => unit.ccds.push(ccd.to_string()),
            None => rafts.push(RaftUnit::new(raft, vec![ccd.to_string()])),
        }
    }
    rafts
}

/// How the leftover units of an uneven split are distributed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemainderPolicy {
    /// The first worker takes the whole remainder.
    #[default]
    FirstWorker,
    /// The first `remainder` workers take one extra unit each.
    Spread,
}

/// One worker's slice of an assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share<U> {
    pub worker: String,
    pub units: Vec<U>,
}

/// Worker to ordered units. Workers with no units are omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment<U> {
    pub shares: Vec<Share<U>>,
}

/// Assignment of rafts to forwarders, as attached to a job.
pub type WorkAssignment = Assignment<RaftUnit>;

impl<U> Default for Assignment<U> {
    fn default() -> Self {
        Self { shares: Vec::new() }
    }
}

impl<U> Assignment<U> {
    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }

    pub fn workers(&self) -> impl Iterator<Item = &str> {
        self.shares.iter().map(|s| s.worker.as_str())
    }

    pub fn units_for(&self, worker: &str) -> Option<&[U]> {
        self.shares
            .iter()
            .find(|s| s.worker == worker)
            .map(|s| s.units.as_slice())
    }

    pub fn unit_count(&self) -> usize {
        self.shares.iter().map(|s| s.units.len()).sum()
    }
}

impl WorkAssignment {
    /// Every CCD unit id in assignment order.
    pub fn all_unit_ids(&self) -> Vec<String> {
        self.shares
            .iter()
            .flat_map(|s| s.units.iter().flat_map(RaftUnit::unit_ids))
            .collect()
    }

    /// CCD unit ids handled by one worker.
    pub fn unit_ids_for(&self, worker: &str) -> Vec<String> {
        self.units_for(worker)
            .map(|units| units.iter().flat_map(RaftUnit::unit_ids).collect())
            .unwrap_or_default()
    }
}

/// Divide `units` across `workers`.
///
/// A single worker gets everything. When there are no more units than workers, each of
/// the first `units.len()` workers gets one. Otherwise each worker gets
/// `units.len() / workers.len()` contiguous units and the remainder is placed according
/// to `policy`.
pub fn partition<U: Clone>(
    units: &[U],
    workers: &[String],
    policy: RemainderPolicy,
) -> Result<Assignment<U>, PartitionError> {
    if units.is_empty() {
        return Ok(Assignment::default());
    }
    if workers.is_empty() {
        return Err(PartitionError::InvalidInput { units: units.len() });
    }

    if workers.len() == 1 {
        return Ok(Assignment {
            shares: vec![Share {
                worker: workers[0].clone(),
                units: units.to_vec(),
            }],
        });
    }

    if units.len() <= workers.len() {
        let shares = units
            .iter()
            .zip(workers)
            .map(|(unit, worker)| Share {
                worker: worker.clone(),
                units: vec![unit.clone()],
            })
            .collect();
        return Ok(Assignment { shares });
    }

    let base = units.len() / workers.len();
    let remainder = units.len() % workers.len();

    let mut shares = Vec::with_capacity(workers.len());
    let mut offset = 0;
    for (index, worker) in workers.iter().enumerate() {
        let size = match policy {
            RemainderPolicy::FirstWorker if index == 0 => base + remainder,
            RemainderPolicy::FirstWorker => base,
            RemainderPolicy::Spread if index < remainder => base + 1,
            RemainderPolicy::Spread => base,
        };
        shares.push(Share {
            worker: worker.clone(),
            units: units[offset..offset + size].to_vec(),
        });
        offset += size;
    }

    Ok(Assignment { shares })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workers(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("F{}", i)).collect()
    }

    fn sizes<U>(a: &Assignment<U>) -> Vec<usize> {
        a.shares.iter().map(|s| s.units.len()).collect()
    }

    #[test]
    fn test_rafts_from_unit_ids_round_trips_layout() {
        let layout = vec![
            RaftUnit::new("R00", vec!["S00".into(), "S01".into()]),
            RaftUnit::new("R10", vec!["S11".into()]),
        ];
        let ids: Vec<String> = layout.iter().flat_map(RaftUnit::unit_ids).collect();
        assert_eq!(rafts_from_unit_ids(&ids), layout);

        let subset = vec!["R10/S11".to_string(), "R00/S01".to_string()];
        let rafts = rafts_from_unit_ids(&subset);
        assert_eq!(rafts[0].raft, "R10");
        assert_eq!(rafts[1].ccds, vec!["S01"]);
    }

    #[test]
    fn test_seven_units_three_workers() {
        let units: Vec<u32> = (0..7).collect();
        let a = partition(&units, &workers(3), RemainderPolicy::FirstWorker).unwrap();

        assert_eq!(a.shares[0].units, vec![0, 1, 2]);
        assert_eq!(a.shares[1].units, vec![3, 4]);
        assert_eq!(a.shares[2].units, vec![5, 6]);
    }

    #[test]
    fn test_single_worker_takes_all() {
        let units: Vec<u32> = (0..5).collect();
        let a = partition(&units, &workers(1), RemainderPolicy::FirstWorker).unwrap();
        assert_eq!(a.shares.len(), 1);
        assert_eq!(a.shares[0].units, units);
    }

    #[test]
    fn test_fewer_units_than_workers() {
        let units = vec!["a", "b"];
        let a = partition(&units, &workers(4), RemainderPolicy::FirstWorker).unwrap();
        assert_eq!(a.workers().collect::<Vec<_>>(), vec!["F1", "F2"]);
        assert_eq!(sizes(&a), vec![1, 1]);
    }

    #[test]
    fn test_empty_inputs() {
        let none: Vec<u32> = Vec::new();
        assert!(partition(&none, &[], RemainderPolicy::FirstWorker)
            .unwrap()
            .is_empty());
        assert!(partition(&none, &workers(2), RemainderPolicy::FirstWorker)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_no_workers_is_invalid() {
        let err = partition(&[1, 2], &[], RemainderPolicy::FirstWorker).unwrap_err();
        assert_eq!(err, PartitionError::InvalidInput { units: 2 });
    }

    #[test]
    fn test_spread_balances_remainder() {
        let units: Vec<u32> = (0..11).collect();
        let a = partition(&units, &workers(4), RemainderPolicy::Spread).unwrap();
        assert_eq!(sizes(&a), vec![3, 3, 3, 2]);

        let first = partition(&units, &workers(4), RemainderPolicy::FirstWorker).unwrap();
        assert_eq!(sizes(&first), vec![5, 2, 2, 2]);
    }

    #[test]
    fn test_coverage_and_determinism() {
        for n_units in 0..20u32 {
            for n_workers in 1..7 {
                let units: Vec<u32> = (0..n_units).collect();
                for policy in [RemainderPolicy::FirstWorker, RemainderPolicy::Spread] {
                    let a = partition(&units, &workers(n_workers), policy).unwrap();
                    let flat: Vec<u32> =
                        a.shares.iter().flat_map(|s| s.units.clone()).collect();
                    assert_eq!(flat, units);
                    assert_eq!(a, partition(&units, &workers(n_workers), policy).unwrap());

                    let s = sizes(&a);
                    if let (Some(max), Some(min)) = (s.iter().max(), s.iter().min()) {
                        let remainder = n_units as usize % n_workers;
                        if policy == RemainderPolicy::Spread || remainder <= 1 {
                            assert!(max - min <= 1, "{:?} for {}/{}", s, n_units, n_workers);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_raft_unit_ids() {
        let rafts = vec![
            RaftUnit::new("R01", vec!["S00".into(), "S01".into()]),
            RaftUnit::new("R02", vec!["S00".into()]),
        ];
        let a = partition(&rafts, &workers(2), RemainderPolicy::FirstWorker).unwrap();
        assert_eq!(a.all_unit_ids(), vec!["R01/S00", "R01/S01", "R02/S00"]);
        assert_eq!(a.unit_ids_for("F2"), vec!["R02/S00"]);
        assert!(a.unit_ids_for("F9").is_empty());
    }
}
