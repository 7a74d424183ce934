use std::net::IpAddr;

use ipnet::IpNet;
use tracing::debug;

use crate::engine::{Allocation, Applicator};
use crate::error::{PoolError, Result};
use crate::table::{addr, Route};
use crate::types::{labels, EntryValue, Labels, PrefixType};

use super::{inherited_labels, not_validated, parent_type, ClaimContext, IpamTable};

/// Where an address lands once validated.
#[derive(Clone, Debug, PartialEq, Eq)]
enum AddressTarget {
    /// Host route in the main table, optionally carrying the subnet length.
    Main {
        host: IpNet,
        context_len: Option<u8>,
        inherited: Labels,
    },
    /// Address inside a range table.
    Range {
        name: String,
        address: IpAddr,
        inherited: Labels,
    },
}

impl AddressTarget {
    fn address(&self) -> IpAddr {
        match self {
            AddressTarget::Main { host, .. } => host.addr(),
            AddressTarget::Range { address, .. } => *address,
        }
    }

    fn range_name(&self) -> Option<&str> {
        match self {
            AddressTarget::Main { .. } => None,
            AddressTarget::Range { name, .. } => Some(name),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AddressForm {
    /// Full-length static address; needs a range or an untyped parent.
    Host,
    /// Static address with its subnet length (`10.0.0.5/24`); needs a Network parent.
    Context(u8),
    /// Dynamically picked address; anything but an Aggregate parent.
    Dynamic,
}

impl AddressForm {
    fn context_len(self) -> Option<u8> {
        match self {
            AddressForm::Context(len) => Some(len),
            _ => None,
        }
    }
}

fn resolve(
    ctx: &ClaimContext,
    table: &IpamTable,
    address: IpAddr,
    form: AddressForm,
) -> Result<AddressTarget> {
    let host = addr::host_prefix(address);
    if let Some(route) = table.rib.get(&host) {
        if route.prefix_type() == PrefixType::Range {
            return in_range(ctx, table, route, address, form);
        }
        ctx.claim.validate_owner(host, route.labels())?;
        // held by this claim already: no placement checks
        let inherited = table
            .rib
            .longest_parent(&host)
            .map(inherited_labels)
            .unwrap_or_default();
        return Ok(AddressTarget::Main {
            host,
            context_len: form.context_len(),
            inherited,
        });
    }

    let parent = table
        .rib
        .longest_parent(&host)
        .ok_or_else(|| PoolError::NoParent(host.to_string()))?;
    if parent.prefix_type() == PrefixType::Range {
        return in_range(ctx, table, parent, address, form);
    }
    match (form, parent.prefix_type()) {
        (AddressForm::Context(len), PrefixType::Network) if parent.prefix().prefix_len() == len => {}
        (AddressForm::Context(len), _) => {
            return Err(parent_type(format!("{address}/{len}"), parent));
        }
        (AddressForm::Host, PrefixType::Aggregate | PrefixType::Network)
        | (AddressForm::Dynamic, PrefixType::Aggregate) => {
            return Err(parent_type(host, parent));
        }
        _ => {}
    }

    let children = table.rib.children(&host);
    if !children.is_empty() {
        return Err(PoolError::HasChildren {
            value: host.to_string(),
            children: children.len(),
        });
    }

    Ok(AddressTarget::Main {
        host,
        context_len: form.context_len(),
        inherited: inherited_labels(parent),
    })
}

fn in_range(
    ctx: &ClaimContext,
    table: &IpamTable,
    route: &Route,
    address: IpAddr,
    form: AddressForm,
) -> Result<AddressTarget> {
    if let AddressForm::Context(len) = form {
        return Err(parent_type(format!("{address}/{len}"), route));
    }
    let name = route.range_name().ok_or_else(|| {
        PoolError::Corruption(format!("range route {} has no range name", route.prefix()))
    })?;
    if let Some(stored) = table.ranges.get(name).and_then(|range| range.get(address)) {
        ctx.claim.validate_owner(address, stored)?;
    }
    Ok(AddressTarget::Range {
        name: name.to_string(),
        address,
        inherited: inherited_labels(route),
    })
}

fn release(ctx: &ClaimContext, table: &mut IpamTable) {
    table.rib.remove_where(|route| ctx.owns(route.labels()));
    table.ranges.remove_where(|stored| ctx.owns(stored));
}

fn apply_target(
    ctx: &ClaimContext,
    table: &mut IpamTable,
    target: &AddressTarget,
) -> Result<Allocation> {
    release(ctx, table);
    match target {
        AddressTarget::Main {
            host,
            context_len,
            inherited,
        } => {
            let mut stored = inherited.clone();
            stored.extend(ctx.labels());
            if let Some(len) = context_len {
                stored.insert(labels::PREFIX_LENGTH.into(), len.to_string());
            }
            table.rib.insert(Route::new(*host, stored));
            let len = context_len.unwrap_or(host.max_prefix_len());
            let allocated = IpNet::new(host.addr(), len)
                .map_err(|_| PoolError::invalid("claim", format!("bad prefix length {len}")))?;
            Ok(Allocation::Address(allocated))
        }
        AddressTarget::Range {
            name,
            address,
            inherited,
        } => {
            let mut stored = inherited.clone();
            stored.extend(ctx.labels());
            stored.insert(labels::RANGE_NAME.into(), name.clone());
            table.ranges.get_or_create(name)?.insert(*address, stored)?;
            Ok(Allocation::Address(addr::host_prefix(*address)))
        }
    }
}

/// Places one caller-chosen address.
#[derive(Clone, Debug)]
pub struct StaticAddressApplicator {
    ctx: ClaimContext,
    target: Option<AddressTarget>,
}

impl StaticAddressApplicator {
    pub(super) fn new(ctx: ClaimContext) -> Self {
        Self { ctx, target: None }
    }
}

impl Applicator for StaticAddressApplicator {
    type Table = IpamTable;

    fn validate(&mut self, table: &IpamTable) -> Result<()> {
        let address = self.ctx.claim.spec.address.ok_or_else(|| {
            PoolError::invalid("claim", "static-address requires spec.address")
        })?;
        let form = match self.ctx.claim.spec.prefix_length {
            Some(len) if len < addr::width(&address) => AddressForm::Context(len),
            _ => AddressForm::Host,
        };
        self.ctx.check_declared(&addr::host_prefix(address))?;
        self.target = Some(resolve(&self.ctx, table, address, form)?);
        Ok(())
    }

    fn apply(&mut self, table: &mut IpamTable) -> Result<Allocation> {
        let target = self.target.as_ref().ok_or_else(not_validated)?;
        apply_target(&self.ctx, table, target)
    }

    fn delete(&mut self, table: &mut IpamTable) -> Result<()> {
        release(&self.ctx, table);
        Ok(())
    }
}

/// Picks the lowest free address of a named range or of the Network
/// prefixes matching the claim selector.
#[derive(Clone, Debug)]
pub struct DynamicAddressApplicator {
    ctx: ClaimContext,
    target: Option<AddressTarget>,
}

impl DynamicAddressApplicator {
    pub(super) fn new(ctx: ClaimContext) -> Self {
        Self { ctx, target: None }
    }

    fn wanted_range(&self) -> Result<Option<(String, IpAddr)>> {
        match self.ctx.claim.spec.range.as_deref() {
            Some(raw) => {
                let (start, end) = addr::parse_ip_range(raw)?;
                Ok(Some((addr::format_range(start, end), start)))
            }
            None => Ok(None),
        }
    }

    fn in_scope(&self, target: &AddressTarget, wanted: Option<&str>) -> bool {
        match wanted {
            Some(name) => target.range_name() == Some(name),
            None => true,
        }
    }

    fn owned(&self, table: &IpamTable) -> Option<IpAddr> {
        table
            .rib
            .iter()
            .find(|route| addr::is_host(&route.prefix()) && self.ctx.owns(route.labels()))
            .map(|route| route.prefix().addr())
            .or_else(|| {
                table
                    .ranges
                    .find(|stored| self.ctx.owns(stored))
                    .map(|(_, address)| address)
            })
    }

    fn search(&self, table: &IpamTable, wanted: Option<(String, IpAddr)>) -> Result<AddressTarget> {
        if let Some((name, start)) = wanted {
            let route = table
                .rib
                .iter()
                .find(|route| route.range_name() == Some(name.as_str()))
                .ok_or_else(|| PoolError::NoParent(name.clone()))?;
            let address = match table.ranges.get(&name) {
                Some(range) => range.first_free(),
                None => Some(start),
            }
            .ok_or_else(|| self.ctx.exhausted(&name))?;
            return Ok(AddressTarget::Range {
                inherited: inherited_labels(route),
                name,
                address,
            });
        }

        for route in table
            .rib
            .iter()
            .filter(|route| route.prefix_type() == PrefixType::Network && self.ctx.selects(route))
        {
            let prefix = route.prefix();
            let v4 = prefix.addr().is_ipv4();
            let (mut lo, mut hi) = route.span();
            if prefix.prefix_len() + 1 < prefix.max_prefix_len() {
                lo += 1;
            }
            if v4 && prefix.prefix_len() < 31 {
                hi -= 1;
            }
            let taken: Vec<(u128, u128)> = table
                .rib
                .children(&prefix)
                .iter()
                .map(|child| child.span())
                .collect();
            if let Some(value) = addr::first_fit(lo, hi, 1, taken) {
                let address = addr::from_u128(value, v4);
                return Ok(AddressTarget::Main {
                    host: addr::host_prefix(address),
                    context_len: None,
                    inherited: inherited_labels(route),
                });
            }
        }
        Err(self.ctx.exhausted("no free address in any network"))
    }
}

impl Applicator for DynamicAddressApplicator {
    type Table = IpamTable;

    fn validate(&mut self, table: &IpamTable) -> Result<()> {
        let wanted = self.wanted_range()?;
        let wanted_name = wanted.as_ref().map(|(name, _)| name.as_str());

        if let Some(address) = self.owned(table) {
            if let Ok(target) = resolve(&self.ctx, table, address, AddressForm::Dynamic) {
                if self.in_scope(&target, wanted_name) {
                    self.target = Some(target);
                    return Ok(());
                }
            }
        }

        if let Some(EntryValue::Prefix(prefix)) = self.ctx.mode.hint().and_then(|e| e.value().ok()) {
            match resolve(&self.ctx, table, prefix.addr(), AddressForm::Dynamic) {
                Ok(target) if self.in_scope(&target, wanted_name) => {
                    self.target = Some(target);
                    return Ok(());
                }
                _ => debug!(claim = %self.ctx.claim.key(), %prefix, "ipam.dynamic_address.hint_taken"),
            }
        }

        let target = self.search(table, wanted)?;
        debug!(
            claim = %self.ctx.claim.key(),
            address = %target.address(),
            "ipam.dynamic_address.selected"
        );
        self.target = Some(target);
        Ok(())
    }

    fn apply(&mut self, table: &mut IpamTable) -> Result<Allocation> {
        let target = self.target.as_ref().ok_or_else(not_validated)?;
        apply_target(&self.ctx, table, target)
    }

    fn delete(&mut self, table: &mut IpamTable) -> Result<()> {
        release(&self.ctx, table);
        Ok(())
    }
}
