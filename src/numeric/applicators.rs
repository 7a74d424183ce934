use tracing::debug;

use crate::engine::{Allocation, Applicator, Mode};
use crate::error::{PoolError, Result};
use crate::table::{Interval, IntervalTable};
use crate::types::{parse_id_range, Claim, EntryValue, Labels, NsName, NumericIndex, OwnerKind};

/// What every numeric applicator knows about its claim.
#[derive(Clone, Debug)]
pub(crate) struct ClaimContext {
    pool: NsName,
    min: u64,
    max: u64,
    claim: Claim,
    mode: Mode,
}

impl ClaimContext {
    pub(super) fn new(pool: &NumericIndex, claim: &Claim, mode: Mode) -> Self {
        Self {
            pool: pool.meta.key(),
            min: pool.min_id(),
            max: pool.max_id(),
            claim: claim.clone(),
            mode,
        }
    }

    fn is_boundary(&self) -> bool {
        self.claim.owner_kind() == OwnerKind::Index
    }

    fn labels(&self) -> Labels {
        self.claim.allocation_labels()
    }

    fn check_space(&self, table: &IntervalTable, value: impl ToString, end: u64) -> Result<()> {
        if end > table.max() {
            return Err(PoolError::OutOfBounds {
                value: value.to_string(),
                bounds: format!("0-{}", table.max()),
            });
        }
        Ok(())
    }

    // Live claims must stay inside [min, max]; replayed ones keep what they had.
    fn check_bounds(&self, value: impl ToString, start: u64, end: u64) -> Result<()> {
        if self.mode.is_admit() && !self.is_boundary() && (start < self.min || end > self.max) {
            return Err(PoolError::OutOfBounds {
                value: value.to_string(),
                bounds: format!("{}-{}", self.min, self.max),
            });
        }
        Ok(())
    }

    fn remove_owned(&self, table: &mut IntervalTable) -> Vec<Interval> {
        table.remove_where(|interval| self.claim.owns(&interval.labels))
    }
}

fn not_validated() -> PoolError {
    PoolError::invalid("claim", "apply called before a successful validate")
}

/// Reserves one caller-chosen id.
#[derive(Clone, Debug)]
pub struct StaticIdApplicator {
    ctx: ClaimContext,
    id: Option<u64>,
}

impl StaticIdApplicator {
    pub(super) fn new(ctx: ClaimContext) -> Self {
        Self { ctx, id: None }
    }
}

impl Applicator for StaticIdApplicator {
    type Table = IntervalTable;

    fn validate(&mut self, table: &IntervalTable) -> Result<()> {
        let id = self
            .ctx
            .claim
            .spec
            .id
            .ok_or_else(|| PoolError::invalid("claim", "static-id requires spec.id"))?;
        self.ctx.check_space(table, id, id)?;
        self.ctx.check_bounds(id, id, id)?;
        for interval in table.overlapping(id, id) {
            self.ctx.claim.validate_owner(id, &interval.labels)?;
        }
        self.id = Some(id);
        Ok(())
    }

    fn apply(&mut self, table: &mut IntervalTable) -> Result<Allocation> {
        let id = self.id.ok_or_else(not_validated)?;
        self.ctx.remove_owned(table);
        table.insert(Interval::new(id, id, self.ctx.labels()))?;
        Ok(Allocation::Id(id))
    }

    fn delete(&mut self, table: &mut IntervalTable) -> Result<()> {
        self.ctx.remove_owned(table);
        Ok(())
    }
}

/// Picks the lowest free id inside the pool bounds.
#[derive(Clone, Debug)]
pub struct DynamicIdApplicator {
    ctx: ClaimContext,
    chosen: Option<u64>,
}

impl DynamicIdApplicator {
    pub(super) fn new(ctx: ClaimContext) -> Self {
        Self { ctx, chosen: None }
    }

    fn free_for_claim(&self, table: &IntervalTable, id: u64) -> bool {
        id <= table.max()
            && table
                .overlapping(id, id)
                .iter()
                .all(|interval| self.ctx.claim.owns(&interval.labels))
    }
}

impl Applicator for DynamicIdApplicator {
    type Table = IntervalTable;

    fn validate(&mut self, table: &IntervalTable) -> Result<()> {
        let claim = &self.ctx.claim;
        if let Some(owned) = table
            .iter()
            .find(|interval| interval.start == interval.end && claim.owns(&interval.labels))
        {
            self.chosen = Some(owned.start);
            return Ok(());
        }
        if let Some(EntryValue::Id(id)) = self.ctx.mode.hint().and_then(|e| e.value().ok()) {
            if self.free_for_claim(table, id) {
                self.chosen = Some(id);
                return Ok(());
            }
            debug!(claim = %claim.key(), id, "numeric.dynamic_id.hint_taken");
        }
        let hi = self.ctx.max.min(table.max());
        let id = table
            .first_free(self.ctx.min, hi)
            .ok_or_else(|| PoolError::Exhausted(self.ctx.pool.to_string()))?;
        self.chosen = Some(id);
        Ok(())
    }

    fn apply(&mut self, table: &mut IntervalTable) -> Result<Allocation> {
        let id = self.chosen.ok_or_else(not_validated)?;
        self.ctx.remove_owned(table);
        table.insert(Interval::new(id, id, self.ctx.labels()))?;
        Ok(Allocation::Id(id))
    }

    fn delete(&mut self, table: &mut IntervalTable) -> Result<()> {
        self.ctx.remove_owned(table);
        Ok(())
    }
}

/// Reserves a `start-end` interval.
///
/// Pool boundary claims never conflict: they only fill the free gaps of
/// their span, so ids issued before a shrink stay where they are.
#[derive(Clone, Debug)]
pub struct IdRangeApplicator {
    ctx: ClaimContext,
    span: Option<(u64, u64)>,
}

impl IdRangeApplicator {
    pub(super) fn new(ctx: ClaimContext) -> Self {
        Self { ctx, span: None }
    }
}

impl Applicator for IdRangeApplicator {
    type Table = IntervalTable;

    fn validate(&mut self, table: &IntervalTable) -> Result<()> {
        let claim = &self.ctx.claim;
        let raw = claim
            .spec
            .range
            .as_deref()
            .ok_or_else(|| PoolError::invalid("claim", "id-range requires spec.range"))?;
        let (start, end) = parse_id_range(raw)?;
        let rendered = format!("{start}-{end}");
        self.ctx.check_space(table, &rendered, end)?;
        if !self.ctx.is_boundary() {
            self.ctx.check_bounds(&rendered, start, end)?;
            if let Some(other) = table
                .overlapping(start, end)
                .into_iter()
                .find(|interval| !claim.owns(&interval.labels))
            {
                return Err(PoolError::Overlap {
                    value: rendered,
                    existing: format!(
                        "{} (held by {})",
                        other.render(),
                        crate::types::labels::holder(&other.labels)
                    ),
                });
            }
        }
        self.span = Some((start, end));
        Ok(())
    }

    fn apply(&mut self, table: &mut IntervalTable) -> Result<Allocation> {
        let (start, end) = self.span.ok_or_else(not_validated)?;
        self.ctx.remove_owned(table);
        let labels = self.ctx.labels();
        if self.ctx.is_boundary() {
            for (gap_start, gap_end) in table.free_gaps(start, end) {
                table.insert(Interval::new(gap_start, gap_end, labels.clone()))?;
            }
        } else {
            table.insert(Interval::new(start, end, labels))?;
        }
        Ok(Allocation::IdRange(start, end))
    }

    fn delete(&mut self, table: &mut IntervalTable) -> Result<()> {
        self.ctx.remove_owned(table);
        Ok(())
    }
}
