use std::collections::BTreeSet;

use ipnet::IpNet;

use crate::engine::{Allocation, Applicator};
use crate::error::{PoolError, Result};
use crate::table::{addr, Route};
use crate::types::{labels, Labels, PrefixType};

use super::{drop_range, inherited_labels, not_validated, parent_type, ClaimContext, IpamTable};

#[derive(Clone, Debug)]
struct Placement {
    name: String,
    cidrs: Vec<IpNet>,
    inherited: Labels,
}

/// Installs an address range as `Range` routes backed by its own table.
#[derive(Clone, Debug)]
pub struct StaticRangeApplicator {
    ctx: ClaimContext,
    placement: Option<Placement>,
}

impl StaticRangeApplicator {
    pub(super) fn new(ctx: ClaimContext) -> Self {
        Self {
            ctx,
            placement: None,
        }
    }

    fn drop_owned(&self, table: &mut IpamTable, keep: Option<&str>) {
        let removed = table.rib.remove_where(|route| {
            self.ctx.owns(route.labels()) && (keep.is_none() || route.range_name() != keep)
        });
        let names: BTreeSet<&str> = removed.iter().filter_map(Route::range_name).collect();
        for name in names {
            drop_range(table, &self.ctx.pool, name);
        }
    }
}

impl Applicator for StaticRangeApplicator {
    type Table = IpamTable;

    fn validate(&mut self, table: &IpamTable) -> Result<()> {
        let raw = self
            .ctx
            .claim
            .spec
            .range
            .as_deref()
            .ok_or_else(|| PoolError::invalid("claim", "static-range requires spec.range"))?;
        let (start, end) = addr::parse_ip_range(raw)?;
        let name = addr::format_range(start, end);
        self.ctx.check_declared(&addr::host_prefix(start))?;
        self.ctx.check_declared(&addr::host_prefix(end))?;

        // Foreign range routes are reported as overlaps below, not as parents.
        let parent = table
            .rib
            .parents(&addr::host_prefix(start))
            .into_iter()
            .find(|route| {
                !self.ctx.owns(route.labels()) && route.prefix_type() != PrefixType::Range
            })
            .ok_or_else(|| PoolError::NoParent(name.clone()))?;
        if !parent.prefix().contains(&end) {
            return Err(PoolError::NoParent(name));
        }
        if !matches!(parent.prefix_type(), PrefixType::Network | PrefixType::Other) {
            return Err(parent_type(&name, parent));
        }

        let cidrs = addr::range_to_cidrs(start, end);
        for cidr in &cidrs {
            if let Some(route) = table.rib.get(cidr) {
                self.ctx.claim.validate_owner(&name, route.labels())?;
                continue;
            }
            let foreign = table
                .rib
                .children(cidr)
                .iter()
                .filter(|child| !self.ctx.owns(child.labels()))
                .count();
            if foreign > 0 {
                return Err(PoolError::HasChildren {
                    value: name,
                    children: foreign,
                });
            }
            if let Some(covering) = table.rib.longest_parent(cidr) {
                if covering.prefix() != parent.prefix() && !self.ctx.owns(covering.labels()) {
                    return Err(PoolError::Overlap {
                        value: name,
                        existing: format!(
                            "{} (held by {})",
                            covering.prefix(),
                            labels::holder(covering.labels())
                        ),
                    });
                }
            }
        }

        self.placement = Some(Placement {
            inherited: inherited_labels(parent),
            name,
            cidrs,
        });
        Ok(())
    }

    fn apply(&mut self, table: &mut IpamTable) -> Result<Allocation> {
        let placement = self.placement.as_ref().ok_or_else(not_validated)?;
        self.drop_owned(table, Some(&placement.name));
        let mut stored = placement.inherited.clone();
        stored.extend(self.ctx.labels());
        stored.insert(labels::PREFIX_TYPE.into(), PrefixType::Range.as_str().into());
        stored.insert(labels::RANGE_NAME.into(), placement.name.clone());
        for cidr in &placement.cidrs {
            table.rib.insert(Route::new(*cidr, stored.clone()));
        }
        Ok(Allocation::Range(placement.name.clone()))
    }

    fn delete(&mut self, table: &mut IpamTable) -> Result<()> {
        self.drop_owned(table, None);
        Ok(())
    }
}
