use std::collections::BTreeMap;
use std::net::IpAddr;

use crate::error::{PoolError, Result};
use crate::types::Labels;

use super::addr;

/// Flat address table local to one declared range.
#[derive(Clone, Debug)]
pub struct RangeTable {
    name: String,
    start: IpAddr,
    end: IpAddr,
    addresses: BTreeMap<IpAddr, Labels>,
}

impl RangeTable {
    /// Empty table for `[start, end]`.
    pub fn new(name: impl Into<String>, start: IpAddr, end: IpAddr) -> Self {
        Self {
            name: name.into(),
            start,
            end,
            addresses: BTreeMap::new(),
        }
    }

    /// Range name (`start-end`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether `addr` lies inside the range.
    pub fn contains(&self, addr: IpAddr) -> bool {
        addr.is_ipv4() == self.start.is_ipv4()
            && addr::to_u128(addr) >= addr::to_u128(self.start)
            && addr::to_u128(addr) <= addr::to_u128(self.end)
    }

    /// Labels of an allocated address.
    pub fn get(&self, addr: IpAddr) -> Option<&Labels> {
        self.addresses.get(&addr)
    }

    /// Allocates `addr`, replacing its labels if already present.
    pub fn insert(&mut self, addr: IpAddr, labels: Labels) -> Result<()> {
        if !self.contains(addr) {
            return Err(PoolError::OutOfBounds {
                value: addr.to_string(),
                bounds: self.name.clone(),
            });
        }
        self.addresses.insert(addr, labels);
        Ok(())
    }

    /// Lowest unallocated address.
    pub fn first_free(&self) -> Option<IpAddr> {
        let taken = self.addresses.keys().map(|a| {
            let value = addr::to_u128(*a);
            (value, value)
        });
        addr::first_fit(
            addr::to_u128(self.start),
            addr::to_u128(self.end),
            1,
            taken,
        )
        .map(|value| addr::from_u128(value, self.start.is_ipv4()))
    }

    /// Removes every address whose labels match `pred`.
    pub fn remove_where<F>(&mut self, mut pred: F) -> Vec<(IpAddr, Labels)>
    where
        F: FnMut(&Labels) -> bool,
    {
        let keys: Vec<IpAddr> = self
            .addresses
            .iter()
            .filter(|(_, labels)| pred(labels))
            .map(|(addr, _)| *addr)
            .collect();
        keys.into_iter()
            .filter_map(|key| self.addresses.remove(&key).map(|labels| (key, labels)))
            .collect()
    }

    /// Number of allocated addresses.
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    /// Whether no address is allocated.
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Allocated addresses, ascending.
    pub fn iter(&self) -> impl Iterator<Item = (&IpAddr, &Labels)> {
        self.addresses.iter()
    }
}

/// Range tables of one pool, keyed by range name and created on first use.
#[derive(Clone, Debug, Default)]
pub struct RangeTables {
    tables: BTreeMap<String, RangeTable>,
}

impl RangeTables {
    /// Table for `name`, if it was created.
    pub fn get(&self, name: &str) -> Option<&RangeTable> {
        self.tables.get(name)
    }

    /// Table for `name`, creating it from the range string on first use.
    pub fn get_or_create(&mut self, name: &str) -> Result<&mut RangeTable> {
        if !self.tables.contains_key(name) {
            let (start, end) = addr::parse_ip_range(name)?;
            self.tables
                .insert(name.to_string(), RangeTable::new(name, start, end));
        }
        self.tables
            .get_mut(name)
            .ok_or_else(|| PoolError::Corruption(format!("range table {name} vanished")))
    }

    /// Drops the table for `name`.
    pub fn remove(&mut self, name: &str) -> Option<RangeTable> {
        self.tables.remove(name)
    }

    /// Removes every address matching `pred` across all tables.
    pub fn remove_where<F>(&mut self, mut pred: F) -> usize
    where
        F: FnMut(&Labels) -> bool,
    {
        self.tables
            .values_mut()
            .map(|table| table.remove_where(&mut pred).len())
            .sum()
    }

    /// Finds the first address whose labels match `pred`.
    pub fn find<F>(&self, mut pred: F) -> Option<(&str, IpAddr)>
    where
        F: FnMut(&Labels) -> bool,
    {
        self.tables.values().find_map(|table| {
            table
                .iter()
                .find(|(_, labels)| pred(labels))
                .map(|(addr, _)| (table.name(), *addr))
        })
    }

    /// All tables, ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = &RangeTable> {
        self.tables.values()
    }
}
