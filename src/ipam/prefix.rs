use ipnet::IpNet;
use tracing::{debug, warn};

use crate::engine::{Allocation, Applicator};
use crate::error::{PoolError, Result};
use crate::table::{addr, Route};
use crate::types::{labels, EntryValue, NsName, PrefixType};

use super::{
    drop_range, inherited_labels, is_pool_route, not_validated, parent_type, ClaimContext,
    IpamTable,
};

/// Releases routes removed from the table together with everything nested in them.
///
/// Pool routes are never cascaded; they go away only with their declaration.
pub(super) fn release_routes(table: &mut IpamTable, pool: &NsName, removed: Vec<Route>) {
    for route in removed {
        if let Some(name) = route.range_name() {
            drop_range(table, pool, name);
            continue;
        }
        let prefix = route.prefix();
        if addr::is_host(&prefix) {
            continue;
        }
        let nested = table.rib.remove_where(|inner| {
            inner.prefix().prefix_len() > prefix.prefix_len()
                && prefix.contains(&inner.prefix())
                && !is_pool_route(inner)
        });
        if nested.is_empty() {
            continue;
        }
        warn!(pool = %pool, %prefix, routes = nested.len(), "ipam.prefix.cascade");
        for inner in &nested {
            if let Some(name) = inner.range_name() {
                drop_range(table, pool, name);
            }
        }
    }
}

fn install(ctx: &ClaimContext, table: &mut IpamTable, prefix: IpNet, prefix_type: PrefixType) {
    let stale = table
        .rib
        .remove_where(|route| ctx.owns(route.labels()) && route.prefix() != prefix);
    release_routes(table, &ctx.pool, stale);
    let mut stored = table
        .rib
        .longest_parent(&prefix)
        .map(inherited_labels)
        .unwrap_or_default();
    stored.extend(ctx.labels());
    stored.insert(labels::PREFIX_TYPE.into(), prefix_type.as_str().into());
    table.rib.insert(Route::new(prefix, stored));
}

fn remove(ctx: &ClaimContext, table: &mut IpamTable) {
    let removed = table.rib.remove_where(|route| ctx.owns(route.labels()));
    release_routes(table, &ctx.pool, removed);
}

fn prefix_type(ctx: &ClaimContext) -> PrefixType {
    ctx.claim.spec.prefix_type.unwrap_or_default()
}

/// Checks that `prefix` can hold a new route for the claim: the parent admits
/// child prefixes and nothing foreign sits below it, unless it is an aggregate.
fn check_placement(
    ctx: &ClaimContext,
    table: &IpamTable,
    prefix: &IpNet,
    prefix_type: PrefixType,
) -> Result<()> {
    if ctx.is_pool_claim() {
        return Ok(());
    }
    let parent = table
        .rib
        .longest_parent(prefix)
        .ok_or_else(|| PoolError::NoParent(prefix.to_string()))?;
    if !matches!(parent.prefix_type(), PrefixType::Aggregate | PrefixType::Other) {
        return Err(parent_type(prefix, parent));
    }
    if prefix_type != PrefixType::Aggregate {
        let foreign = table
            .rib
            .children(prefix)
            .iter()
            .filter(|child| !ctx.owns(child.labels()))
            .count();
        if foreign > 0 {
            return Err(PoolError::HasChildren {
                value: prefix.to_string(),
                children: foreign,
            });
        }
    }
    Ok(())
}

/// Reserves a caller-chosen prefix.
#[derive(Clone, Debug)]
pub struct StaticPrefixApplicator {
    ctx: ClaimContext,
    prefix: Option<IpNet>,
}

impl StaticPrefixApplicator {
    pub(super) fn new(ctx: ClaimContext) -> Self {
        Self { ctx, prefix: None }
    }
}

impl Applicator for StaticPrefixApplicator {
    type Table = IpamTable;

    fn validate(&mut self, table: &IpamTable) -> Result<()> {
        let prefix = self
            .ctx
            .claim
            .spec
            .prefix
            .ok_or_else(|| PoolError::invalid("claim", "static-prefix requires spec.prefix"))?
            .trunc();
        self.ctx.check_declared(&prefix)?;
        match table.rib.get(&prefix) {
            Some(route) => self.ctx.claim.validate_owner(prefix, route.labels())?,
            None => check_placement(&self.ctx, table, &prefix, prefix_type(&self.ctx))?,
        }
        self.prefix = Some(prefix);
        Ok(())
    }

    fn apply(&mut self, table: &mut IpamTable) -> Result<Allocation> {
        let prefix = self.prefix.ok_or_else(not_validated)?;
        install(&self.ctx, table, prefix, prefix_type(&self.ctx));
        Ok(Allocation::Prefix(prefix))
    }

    fn delete(&mut self, table: &mut IpamTable) -> Result<()> {
        remove(&self.ctx, table);
        Ok(())
    }
}

/// Carves the lowest free prefix of the requested length out of the
/// Aggregate and untyped prefixes matching the claim selector.
#[derive(Clone, Debug)]
pub struct DynamicPrefixApplicator {
    ctx: ClaimContext,
    prefix: Option<IpNet>,
}

impl DynamicPrefixApplicator {
    pub(super) fn new(ctx: ClaimContext) -> Self {
        Self { ctx, prefix: None }
    }

    fn available(&self, table: &IpamTable, prefix: &IpNet) -> bool {
        match table.rib.get(prefix) {
            Some(route) => self.ctx.owns(route.labels()),
            None => check_placement(&self.ctx, table, prefix, prefix_type(&self.ctx)).is_ok(),
        }
    }

    fn search(&self, table: &IpamTable, len: u8) -> Option<IpNet> {
        table
            .rib
            .iter()
            .filter(|route| {
                let parent = route.prefix();
                matches!(route.prefix_type(), PrefixType::Aggregate | PrefixType::Other)
                    && parent.prefix_len() < len
                    && len <= parent.max_prefix_len()
                    && self.ctx.selects(route)
            })
            .find_map(|route| {
                let parent = route.prefix();
                let size = 1u128 << (parent.max_prefix_len() - len);
                let (lo, hi) = route.span();
                let taken: Vec<(u128, u128)> = table
                    .rib
                    .children(&parent)
                    .iter()
                    .map(|child| child.span())
                    .collect();
                let start = addr::first_fit(lo, hi, size, taken)?;
                IpNet::new(addr::from_u128(start, parent.addr().is_ipv4()), len).ok()
            })
    }
}

impl Applicator for DynamicPrefixApplicator {
    type Table = IpamTable;

    fn validate(&mut self, table: &IpamTable) -> Result<()> {
        let len = self.ctx.claim.spec.prefix_length.ok_or_else(|| {
            PoolError::invalid("claim", "dynamic-prefix requires spec.prefix_length")
        })?;

        if let Some(owned) = table
            .rib
            .iter()
            .find(|route| self.ctx.owns(route.labels()) && route.prefix().prefix_len() == len)
        {
            self.prefix = Some(owned.prefix());
            return Ok(());
        }

        if let Some(EntryValue::Prefix(hint)) = self.ctx.mode.hint().and_then(|e| e.value().ok()) {
            if hint.prefix_len() == len && self.available(table, &hint) {
                self.prefix = Some(hint);
                return Ok(());
            }
            debug!(claim = %self.ctx.claim.key(), %hint, "ipam.dynamic_prefix.hint_taken");
        }

        let prefix = self
            .search(table, len)
            .ok_or_else(|| self.ctx.exhausted(format!("no free /{len}")))?;
        self.prefix = Some(prefix);
        Ok(())
    }

    fn apply(&mut self, table: &mut IpamTable) -> Result<Allocation> {
        let prefix = self.prefix.ok_or_else(not_validated)?;
        install(&self.ctx, table, prefix, prefix_type(&self.ctx));
        Ok(Allocation::Prefix(prefix))
    }

    fn delete(&mut self, table: &mut IpamTable) -> Result<()> {
        remove(&self.ctx, table);
        Ok(())
    }
}
