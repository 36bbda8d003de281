//! Receiving-address allocation and rotation
//!
//! Derivation indices come from one shared counter per purpose, global
//! across merchants. An index is claimed by a compare-and-swap on the
//! counter row; a lost swap retries with a fresh read, so two concurrent
//! allocations never share an index. A crash between claim and insert
//! leaves a gap in the index sequence, which is harmless.

use crate::{
    derive,
    error::{Error, Result},
};
use bitcoin::Network;
use chrono::Utc;
use ledger_store::{AddressPurpose, AddressStatus, BtcAddress, Store};
use std::sync::Arc;
use uuid::Uuid;

/// Attempts against the counter before giving up
const MAX_COUNTER_ATTEMPTS: u32 = 16;

/// Allocates and rotates receiving addresses
#[derive(Clone)]
pub struct AddressAllocator {
    store: Arc<Store>,
    topup_key: String,
    tip_key: String,
    network: Network,
}

impl AddressAllocator {
    /// Create an allocator over the configured extended keys
    pub fn new(
        store: Arc<Store>,
        topup_key: impl Into<String>,
        tip_key: impl Into<String>,
        network: Network,
    ) -> Self {
        Self {
            store,
            topup_key: topup_key.into(),
            tip_key: tip_key.into(),
            network,
        }
    }

    fn extended_key(&self, purpose: AddressPurpose) -> &str {
        match purpose {
            AddressPurpose::Topup => &self.topup_key,
            AddressPurpose::Tip => &self.tip_key,
        }
    }

    /// Claim the next derivation index and hand out a fresh address
    pub fn allocate(&self, merchant_id: Uuid, purpose: AddressPurpose) -> Result<BtcAddress> {
        for _ in 0..MAX_COUNTER_ATTEMPTS {
            let counter = self.store.counter(purpose)?;
            let index = counter.next_index;

            let cas = self.store.update_counter_where(
                purpose,
                |c| c.next_index == index,
                |c| c.next_index += 1,
            )?;
            if !cas.applied() {
                continue;
            }

            let address = derive::derive_address(self.extended_key(purpose), index, self.network)?;
            let row = BtcAddress {
                address: address.to_string(),
                merchant_id,
                purpose,
                derivation_index: index,
                status: AddressStatus::Active,
                created_at: Utc::now(),
            };
            self.store.insert_address_if_absent(&row)?;

            tracing::info!(
                %merchant_id,
                purpose = purpose.as_str(),
                index,
                address = %row.address,
                "Receiving address allocated"
            );
            return Ok(row);
        }
        Err(Error::CounterContention(purpose.as_str().to_string()))
    }

    /// Rotate an address after its first detected transaction
    ///
    /// Returns the replacement, or `None` when another run already
    /// rotated it.
    pub fn rotate(&self, address: &str) -> Result<Option<BtcAddress>> {
        let row = self
            .store
            .address(address)?
            .ok_or_else(|| Error::Store(ledger_store::Error::Other(format!(
                "address {} unknown",
                address
            ))))?;

        let cas = self.store.update_address_where(
            address,
            |a| a.status == AddressStatus::Active,
            |a| a.status = AddressStatus::Used,
        )?;
        if !cas.applied() {
            return Ok(None);
        }

        let fresh = self.allocate(row.merchant_id, row.purpose)?;
        tracing::info!(
            retired = %address,
            replacement = %fresh.address,
            "Receiving address rotated"
        );
        Ok(Some(fresh))
    }
}
