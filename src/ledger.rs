//! Balance reconstruction from transfer events.
//!
//! Balances are replayed in signed atomic units: every sender and receiver
//! starts at zero and a transfer moves its value from one to the other, so
//! the pre-filter balances always sum to zero.

use crate::error::HarvestError;
use crate::events::TransferEvent;
use crate::units;
use alloy_primitives::Address;
use anyhow::Result;
use std::collections::BTreeMap;

pub fn compute_balances<'a, I>(transfers: I) -> Result<BTreeMap<Address, i128>>
where
    I: IntoIterator<Item = &'a TransferEvent>,
{
    let mut balances: BTreeMap<Address, i128> = BTreeMap::new();
    for transfer in transfers {
        let value = i128::try_from(transfer.value)
            .map_err(|_| HarvestError::BalanceOverflow { address: transfer.from })?;
        adjust(&mut balances, transfer.from, -value)?;
        adjust(&mut balances, transfer.to, value)?;
    }
    Ok(balances)
}

fn adjust(balances: &mut BTreeMap<Address, i128>, address: Address, delta: i128) -> Result<()> {
    let entry = balances.entry(address).or_insert(0);
    *entry = entry
        .checked_add(delta)
        .ok_or(HarvestError::BalanceOverflow { address })?;
    Ok(())
}

/// Addresses whose replayed balance is at least `min_amount` whole tokens,
/// with that balance in decimal units.
pub fn holders<'a, I>(transfers: I, min_amount: f64) -> Result<BTreeMap<Address, f64>>
where
    I: IntoIterator<Item = &'a TransferEvent>,
{
    let threshold = i128::try_from(units::to_atomic(min_amount)).unwrap_or(i128::MAX);
    Ok(compute_balances(transfers)?
        .into_iter()
        .filter(|(_, balance)| *balance >= threshold)
        .map(|(address, balance)| (address, units::balance_to_decimal(balance)))
        .collect())
}
