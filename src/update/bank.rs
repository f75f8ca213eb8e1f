//! Boot bank control.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::io::{Bank, Storage};
use crate::{Error, Result};

/// The bank the device boots from, logged.
pub fn boot_bank<S: Storage>(storage: &mut S) -> Bank {
    let bank = storage.boot_bank();
    info!("Booted from flash bank {bank:?}");
    bank
}

/// Boot from the other bank from next reset.
///
/// On hardware this normally resets the device and does not return.
/// Returns the newly selected bank if it does.
pub fn swap_boot_bank<S: Storage>(storage: &mut S) -> Result<Bank> {
    let current = storage.boot_bank();
    let next = current.other();
    info!("Swapping boot bank {current:?} -> {next:?}");
    storage.set_boot_bank(next).map_err(|e| {
        error!("Failed to set boot bank {next:?}: {e:?}");
        Error::BankSwap
    })?;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockFlash;

    #[test]
    fn test_swap_selects_other_bank() {
        let mut flash = MockFlash::new(Bank::Two);
        assert_eq!(boot_bank(&mut flash), Bank::Two);
        assert_eq!(swap_boot_bank(&mut flash), Ok(Bank::One));
        assert_eq!(flash.boot_sets, [Bank::One]);
        assert_eq!(boot_bank(&mut flash), Bank::One);
    }

    #[test]
    fn test_swap_failure() {
        let mut flash = MockFlash::new(Bank::One);
        flash.fail_boot_set = true;
        assert_eq!(swap_boot_bank(&mut flash), Err(Error::BankSwap));
        assert_eq!(boot_bank(&mut flash), Bank::One);
    }
}
