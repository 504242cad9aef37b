//! # Kit Price Calculator
//!
//! Computes the charged price of a one-time kit order from two configured
//! settings:
//!
//! ```text
//! kit_price = round_half_up(kit.base_price + kit.shipping_fee, 2)
//! ```
//!
//! The calculator holds no state. Its inputs come from a [`SettingsProvider`],
//! which the API layer implements with a write-through-invalidate cache and
//! tests implement with a fixture map.

use std::collections::HashMap;

use crate::error::PricingError;
use crate::money::Money;

/// Setting key for the kit base price.
pub const KIT_BASE_PRICE_KEY: &str = "kit.base_price";

/// Setting key for the kit shipping fee.
pub const KIT_SHIPPING_FEE_KEY: &str = "kit.shipping_fee";

/// Source of decimal configuration values.
pub trait SettingsProvider {
    /// Look up a decimal setting by key.
    fn decimal(&self, key: &str) -> Result<Money, PricingError>;
}

/// Fixture provider, used by tests and as the seed map at startup.
impl SettingsProvider for HashMap<String, Money> {
    fn decimal(&self, key: &str) -> Result<Money, PricingError> {
        self.get(key)
            .copied()
            .ok_or_else(|| PricingError::MissingSetting(key.to_string()))
    }
}

/// A kit price with the components it was computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KitQuote {
    pub base_price: Money,
    pub shipping_fee: Money,
    /// `base_price + shipping_fee`, rounded half-up to two places.
    pub total: Money,
}

/// Stateless price computations over a [`SettingsProvider`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PriceCalculator;

impl PriceCalculator {
    /// Total one-time kit price: base price plus shipping, rounded half-up
    /// to two decimal places.
    pub fn kit_price(settings: &dyn SettingsProvider) -> Result<Money, PricingError> {
        Ok(Self::kit_quote(settings)?.total)
    }

    /// Kit price together with its rounded components. Each setting is
    /// read exactly once.
    pub fn kit_quote(settings: &dyn SettingsProvider) -> Result<KitQuote, PricingError> {
        let base = settings.decimal(KIT_BASE_PRICE_KEY)?;
        let shipping = settings.decimal(KIT_SHIPPING_FEE_KEY)?;
        let total = base.checked_add(shipping).ok_or(PricingError::Overflow)?;
        Ok(KitQuote {
            base_price: base.round_currency(),
            shipping_fee: shipping.round_currency(),
            total: total.round_currency(),
        })
    }

    /// A single configured amount, rounded to currency scale.
    pub fn amount(settings: &dyn SettingsProvider, key: &str) -> Result<Money, PricingError> {
        Ok(settings.decimal(key)?.round_currency())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(base: &str, shipping: &str) -> HashMap<String, Money> {
        HashMap::from([
            (KIT_BASE_PRICE_KEY.to_string(), Money::parse(base).unwrap()),
            (KIT_SHIPPING_FEE_KEY.to_string(), Money::parse(shipping).unwrap()),
        ])
    }

    #[test]
    fn quote_carries_components() {
        let quote = PriceCalculator::kit_quote(&fixture("350.00", "80.00")).unwrap();
        assert_eq!(quote.base_price.to_string(), "350.00");
        assert_eq!(quote.shipping_fee.to_string(), "80.00");
        assert_eq!(quote.total.to_string(), "430.00");
    }

    #[test]
    fn base_plus_shipping() {
        let settings = fixture("350.00", "120.00");
        assert_eq!(
            PriceCalculator::kit_price(&settings).unwrap().to_string(),
            "470.00"
        );
    }

    #[test]
    fn rounds_half_up_after_summing() {
        let settings = fixture("100.004", "0.001");
        assert_eq!(
            PriceCalculator::kit_price(&settings).unwrap().to_string(),
            "100.01"
        );
    }

    #[test]
    fn integer_settings_render_with_cents() {
        let settings = fixture("350", "120");
        assert_eq!(
            PriceCalculator::kit_price(&settings).unwrap().to_string(),
            "470.00"
        );
    }

    #[test]
    fn missing_setting_is_reported() {
        let mut settings = fixture("350.00", "120.00");
        settings.remove(KIT_SHIPPING_FEE_KEY);
        assert_eq!(
            PriceCalculator::kit_price(&settings),
            Err(PricingError::MissingSetting(KIT_SHIPPING_FEE_KEY.to_string()))
        );
    }

    #[test]
    fn changed_setting_changes_next_result() {
        let mut settings = fixture("350.00", "120.00");
        assert_eq!(PriceCalculator::kit_price(&settings).unwrap().to_string(), "470.00");
        settings.insert(KIT_SHIPPING_FEE_KEY.to_string(), Money::parse("80.00").unwrap());
        assert_eq!(PriceCalculator::kit_price(&settings).unwrap().to_string(), "430.00");
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Whole-cent inputs sum exactly, with no rounding drift.
        #[test]
        fn cent_inputs_sum_exactly(base in 0u32..10_000_000, shipping in 0u32..1_000_000) {
            let settings = HashMap::from([
                (KIT_BASE_PRICE_KEY.to_string(), Money::from_minor_units(base)),
                (KIT_SHIPPING_FEE_KEY.to_string(), Money::from_minor_units(shipping)),
            ]);
            let price = PriceCalculator::kit_price(&settings).unwrap();
            prop_assert_eq!(price, Money::from_minor_units(base + shipping));
        }
    }
}
