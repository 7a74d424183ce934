use serde::de::DeserializeOwned;
use serde::Serialize;

use super::claim::Claim;
use super::entry::Entry;
use super::meta::{NsName, ObjectMeta};
use super::pool::{IpIndex, NumericIndex};
use super::selector::Fields;

/// A persisted object kind.
pub trait Record: Clone + Serialize + DeserializeOwned + Fields + Send + Sync + 'static {
    /// Kind name; also the file stem used by the file store.
    const KIND: &'static str;

    /// Object metadata.
    fn meta(&self) -> &ObjectMeta;

    /// Mutable object metadata.
    fn meta_mut(&mut self) -> &mut ObjectMeta;

    /// Storage key.
    fn key(&self) -> NsName {
        self.meta().key()
    }
}

macro_rules! impl_record {
    ($ty:ty, $kind:literal) => {
        impl Record for $ty {
            const KIND: &'static str = $kind;

            fn meta(&self) -> &ObjectMeta {
                &self.meta
            }

            fn meta_mut(&mut self) -> &mut ObjectMeta {
                &mut self.meta
            }
        }
    };
}

impl_record!(Claim, "claims");
impl_record!(Entry, "entries");
impl_record!(IpIndex, "ip-indexes");
impl_record!(NumericIndex, "numeric-indexes");
