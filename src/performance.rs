//! Performance statistics of estimated states against measurements and
//! ground truth, per step and over whole sequences.

use crate::consistency::Consistency;
use crate::error::{check_shape, Error, Result};
use crate::state_estimator::{GaussParamList, GaussParams};
use log::debug;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Vector norm used for estimation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormOrder {
    L1,
    L2,
    Lp(i32),
    Inf,
}

impl Default for NormOrder {
    fn default() -> Self {
        NormOrder::L2
    }
}

impl NormOrder {
    pub fn norm(&self, err: &DVector<f64>) -> Result<f64> {
        match *self {
            NormOrder::L1 => Ok(err.lp_norm(1)),
            NormOrder::L2 => Ok(err.norm()),
            NormOrder::Lp(p) if p >= 1 => Ok(err.lp_norm(p)),
            NormOrder::Lp(p) => Err(Error::InvalidNormOrder(p)),
            NormOrder::Inf => Ok(err.amax()),
        }
    }
}

/// Named subset of state indices, e.g. position or velocity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormGroup {
    pub name: String,
    pub idxs: Vec<usize>,
    #[serde(default)]
    pub order: NormOrder,
}

impl NormGroup {
    pub fn new(name: impl Into<String>, idxs: Vec<usize>, order: NormOrder) -> Self {
        NormGroup {
            name: name.into(),
            idxs,
            order,
        }
    }

    pub fn norm(&self, err: &DVector<f64>) -> Result<f64> {
        if self.idxs.is_empty() {
            return Err(Error::InvalidNormGroup {
                name: self.name.clone(),
                reason: "no state indices",
            });
        }
        if let Some(&index) = self.idxs.iter().find(|&&i| i >= err.len()) {
            return Err(Error::IndexOutOfBounds {
                index,
                len: err.len(),
            });
        }
        let sub = DVector::from_iterator(self.idxs.len(), self.idxs.iter().map(|&i| err[i]));
        self.order.norm(&sub)
    }
}

/// How estimation errors are reduced to distances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorNorms {
    /// One norm over the whole state.
    Full(NormOrder),
    /// One norm per group.
    Grouped(Vec<NormGroup>),
}

impl Default for ErrorNorms {
    fn default() -> Self {
        ErrorNorms::Full(NormOrder::L2)
    }
}

impl ErrorNorms {
    pub fn group_names(&self) -> Vec<String> {
        match self {
            ErrorNorms::Full(_) => Vec::new(),
            ErrorNorms::Grouped(groups) => groups.iter().map(|g| g.name.clone()).collect(),
        }
    }
}

/// Scalar statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stat {
    NIS,
    NEESpred,
    NEESupd,
    DistPred,
    DistUpd,
}

impl Stat {
    pub const ALL: [Stat; 5] = [
        Stat::NIS,
        Stat::NEESpred,
        Stat::NEESupd,
        Stat::DistPred,
        Stat::DistUpd,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stat::NIS => "NIS",
            Stat::NEESpred => "NEES_pred",
            Stat::NEESupd => "NEES_upd",
            Stat::DistPred => "dist_pred",
            Stat::DistUpd => "dist_upd",
        }
    }
}

/// Per-group distance statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupedStat {
    DistsPred,
    DistsUpd,
}

impl GroupedStat {
    pub fn name(&self) -> &'static str {
        match self {
            GroupedStat::DistsPred => "dists_pred",
            GroupedStat::DistsUpd => "dists_upd",
        }
    }
}

/// Statistics available at a single step.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceStats {
    pub NIS: Option<f64>,
    pub NEES_pred: Option<f64>,
    pub NEES_upd: Option<f64>,
    pub dist_pred: Option<f64>,
    pub dist_upd: Option<f64>,
    pub dists_pred: Option<Vec<f64>>,
    pub dists_upd: Option<Vec<f64>>,
}

/// Which statistics a row carries, and how many groups for grouped ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSchema {
    pub NIS: bool,
    pub NEES_pred: bool,
    pub NEES_upd: bool,
    pub dist_pred: bool,
    pub dist_upd: bool,
    pub dists_pred: Option<usize>,
    pub dists_upd: Option<usize>,
}

impl StatsSchema {
    pub fn has(&self, stat: Stat) -> bool {
        match stat {
            Stat::NIS => self.NIS,
            Stat::NEESpred => self.NEES_pred,
            Stat::NEESupd => self.NEES_upd,
            Stat::DistPred => self.dist_pred,
            Stat::DistUpd => self.dist_upd,
        }
    }

    pub fn groups(&self, stat: GroupedStat) -> Option<usize> {
        match stat {
            GroupedStat::DistsPred => self.dists_pred,
            GroupedStat::DistsUpd => self.dists_upd,
        }
    }
}

impl PerformanceStats {
    pub fn get(&self, stat: Stat) -> Option<f64> {
        match stat {
            Stat::NIS => self.NIS,
            Stat::NEESpred => self.NEES_pred,
            Stat::NEESupd => self.NEES_upd,
            Stat::DistPred => self.dist_pred,
            Stat::DistUpd => self.dist_upd,
        }
    }

    pub fn get_grouped(&self, stat: GroupedStat) -> Option<&[f64]> {
        match stat {
            GroupedStat::DistsPred => self.dists_pred.as_deref(),
            GroupedStat::DistsUpd => self.dists_upd.as_deref(),
        }
    }

    pub fn schema(&self) -> StatsSchema {
        StatsSchema {
            NIS: self.NIS.is_some(),
            NEES_pred: self.NEES_pred.is_some(),
            NEES_upd: self.NEES_upd.is_some(),
            dist_pred: self.dist_pred.is_some(),
            dist_upd: self.dist_upd.is_some(),
            dists_pred: self.dists_pred.as_ref().map(Vec::len),
            dists_upd: self.dists_upd.as_ref().map(Vec::len),
        }
    }
}

/// Inputs available at one step. Absent fields are simply not evaluated.
#[derive(Debug)]
pub struct StepInputs<'a, Ctx> {
    pub z: Option<&'a DVector<f64>>,
    pub eststate_pred: Option<&'a GaussParams>,
    pub eststate_upd: Option<&'a GaussParams>,
    pub sensor_state: Option<&'a Ctx>,
    pub x_true: Option<&'a DVector<f64>>,
}

impl<'a, Ctx> Default for StepInputs<'a, Ctx> {
    fn default() -> Self {
        StepInputs {
            z: None,
            eststate_pred: None,
            eststate_upd: None,
            sensor_state: None,
            x_true: None,
        }
    }
}

/// Inputs for a whole run. Every provided sequence must have the run length.
#[derive(Debug)]
pub struct SequenceInputs<'a, Ctx> {
    pub Z: Option<&'a [DVector<f64>]>,
    pub eststate_pred: Option<&'a GaussParamList>,
    pub eststate_upd: Option<&'a GaussParamList>,
    pub sensor_states: Option<&'a [Option<Ctx>]>,
    pub X_true: Option<&'a [Option<DVector<f64>>]>,
}

impl<'a, Ctx> Default for SequenceInputs<'a, Ctx> {
    fn default() -> Self {
        SequenceInputs {
            Z: None,
            eststate_pred: None,
            eststate_upd: None,
            sensor_states: None,
            X_true: None,
        }
    }
}

/// Which statistics to derive from ground truth.
///
/// Distances are always computed when ground truth is given. NEES needs a
/// positive definite state covariance and is only computed on request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsConfig {
    #[serde(default)]
    pub norms: ErrorNorms,
    #[serde(default)]
    pub nees: bool,
}

impl StatsConfig {
    pub fn new(norms: ErrorNorms) -> Self {
        StatsConfig { norms, nees: false }
    }

    pub fn with_nees(self) -> Self {
        StatsConfig { nees: true, ..self }
    }
}

impl From<ErrorNorms> for StatsConfig {
    fn from(norms: ErrorNorms) -> Self {
        StatsConfig::new(norms)
    }
}

struct ErrorStats {
    nees: Option<f64>,
    dist: Option<f64>,
    dists: Option<Vec<f64>>,
}

fn error_stats<C>(
    filter: &C,
    eststate: &GaussParams,
    x_true: &DVector<f64>,
    config: &StatsConfig,
) -> Result<ErrorStats>
where
    C: Consistency<Params = GaussParams, Measurement = DVector<f64>, GroundTruth = DVector<f64>>,
{
    check_shape("ground truth", eststate.x.shape(), x_true.shape())?;
    let err = &eststate.x - x_true;
    let (dist, dists) = match &config.norms {
        ErrorNorms::Full(order) => (Some(order.norm(&err)?), None),
        ErrorNorms::Grouped(groups) => {
            let dists = groups
                .iter()
                .map(|g| g.norm(&err))
                .collect::<Result<Vec<_>>>()?;
            (None, Some(dists))
        }
    };
    let nees = if config.nees {
        Some(filter.NEES(eststate, x_true)?)
    } else {
        None
    };
    Ok(ErrorStats { nees, dist, dists })
}

/// Statistics available from the given inputs.
///
/// NIS needs a measurement and a predicted state. With ground truth, the
/// error distances `estimate - truth` are computed for each state given, and
/// NEES as well when `config.nees` is set.
pub fn performance_stats<C>(
    filter: &C,
    inputs: &StepInputs<'_, C::Context>,
    config: &StatsConfig,
) -> Result<PerformanceStats>
where
    C: Consistency<Params = GaussParams, Measurement = DVector<f64>, GroundTruth = DVector<f64>>,
{
    let mut stats = PerformanceStats::default();

    if let (Some(z), Some(pred)) = (inputs.z, inputs.eststate_pred) {
        stats.NIS = Some(filter.NIS(z, pred, inputs.sensor_state)?);
    }

    if let Some(x_true) = inputs.x_true {
        if let Some(pred) = inputs.eststate_pred {
            let err = error_stats(filter, pred, x_true, config)?;
            stats.NEES_pred = err.nees;
            stats.dist_pred = err.dist;
            stats.dists_pred = err.dists;
        }
        if let Some(upd) = inputs.eststate_upd {
            let err = error_stats(filter, upd, x_true, config)?;
            stats.NEES_upd = err.nees;
            stats.dist_upd = err.dist;
            stats.dists_upd = err.dists;
        }
    }

    Ok(stats)
}

fn check_len(what: &'static str, K: usize, len: Option<usize>) -> Result<()> {
    match len {
        Some(len) if len != K => Err(Error::vector_len(what, K, len)),
        _ => Ok(()),
    }
}

/// Statistics for every step of a pre-estimated run of length `K`.
///
/// Ground truth has to be given for all steps or none, so that every row of
/// the table carries the same statistics.
pub fn performance_stats_sequence<C>(
    filter: &C,
    K: usize,
    inputs: &SequenceInputs<'_, C::Context>,
    config: &StatsConfig,
) -> Result<PerformanceTable>
where
    C: Consistency<Params = GaussParams, Measurement = DVector<f64>, GroundTruth = DVector<f64>>,
{
    check_len("measurements", K, inputs.Z.map(|Z| Z.len()))?;
    check_len("predicted states", K, inputs.eststate_pred.map(GaussParamList::len))?;
    check_len("updated states", K, inputs.eststate_upd.map(GaussParamList::len))?;
    check_len("sensor states", K, inputs.sensor_states.map(|ss| ss.len()))?;
    check_len("ground truths", K, inputs.X_true.map(|X| X.len()))?;

    if let Some(X_true) = inputs.X_true {
        if let Some(first) = X_true.first() {
            let present = first.is_some();
            if let Some(step) = X_true.iter().position(|x| x.is_some() != present) {
                return Err(Error::InconsistentSequenceInputs {
                    step,
                    reason: format!(
                        "ground truth is {} here but {} at step 0",
                        if present { "missing" } else { "given" },
                        if present { "given" } else { "missing" },
                    ),
                });
            }
        }
    }

    let rows = (0..K)
        .map(|k| {
            let step = StepInputs {
                z: inputs.Z.map(|Z| &Z[k]),
                eststate_pred: inputs.eststate_pred.map(|l| &l[k]),
                eststate_upd: inputs.eststate_upd.map(|l| &l[k]),
                sensor_state: inputs.sensor_states.and_then(|ss| ss[k].as_ref()),
                x_true: inputs.X_true.and_then(|X| X[k].as_ref()),
            };
            performance_stats(filter, &step, config)
        })
        .collect::<Result<Vec<_>>>()?;

    let table = PerformanceTable::from_rows(rows, config.norms.group_names())?;
    debug!("performance table of {} steps: {:?}", K, table.column_names());
    Ok(table)
}

/// Fixed-schema table of per-step statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceTable {
    schema: StatsSchema,
    group_names: Vec<String>,
    rows: Vec<PerformanceStats>,
}

impl PerformanceTable {
    /// Builds a table, failing at the first row whose statistics differ from
    /// those of the first row.
    pub fn from_rows(rows: Vec<PerformanceStats>, group_names: Vec<String>) -> Result<Self> {
        let schema = rows.first().map(PerformanceStats::schema).unwrap_or_default();
        if let Some(step) = rows.iter().position(|row| row.schema() != schema) {
            return Err(Error::InconsistentSequenceInputs {
                step,
                reason: format!(
                    "statistics {:?} differ from {:?} at step 0",
                    rows[step].schema(),
                    schema
                ),
            });
        }
        Ok(PerformanceTable {
            schema,
            group_names,
            rows,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn schema(&self) -> &StatsSchema {
        &self.schema
    }

    pub fn group_names(&self) -> &[String] {
        &self.group_names
    }

    pub fn rows(&self) -> &[PerformanceStats] {
        &self.rows
    }

    pub fn get(&self, k: usize) -> Option<&PerformanceStats> {
        self.rows.get(k)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PerformanceStats> {
        self.rows.iter()
    }

    pub fn column(&self, stat: Stat) -> Option<Vec<f64>> {
        if !self.schema.has(stat) {
            return None;
        }
        self.rows.iter().map(|row| row.get(stat)).collect()
    }

    /// Grouped distances as a K×G matrix.
    pub fn grouped(&self, stat: GroupedStat) -> Option<DMatrix<f64>> {
        let G = self.schema.groups(stat)?;
        let mut D = DMatrix::zeros(self.rows.len(), G);
        for (mut out, row) in D.row_iter_mut().zip(self.rows.iter()) {
            for (o, d) in out.iter_mut().zip(row.get_grouped(stat)?) {
                *o = *d;
            }
        }
        Some(D)
    }

    /// Mean over the run, e.g. ANIS or ANEES.
    pub fn average(&self, stat: Stat) -> Option<f64> {
        let column = self.column(stat)?;
        if column.is_empty() {
            None
        } else {
            Some(column.iter().sum::<f64>() / column.len() as f64)
        }
    }

    pub fn column_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Stat::ALL
            .iter()
            .filter(|stat| self.schema.has(**stat))
            .map(|stat| stat.name().to_string())
            .collect();
        for stat in [GroupedStat::DistsPred, GroupedStat::DistsUpd].iter() {
            if self.schema.groups(*stat).is_some() {
                names.extend(
                    self.group_names
                        .iter()
                        .map(|g| format!("{}[{}]", stat.name(), g)),
                );
            }
        }
        names
    }
}
