use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Serialize, Deserialize};

use crate::core::{Error, Result};
use crate::protocol::DataRate;

/// Identifier of the EU 863-870 MHz frequency plan
pub const EU_863_870: &str = "EU_863_870";

/// Channel and data rate definitions of a frequency plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrequencyPlan {
    pub id: String,
    pub band_id: String,
    /// Lowest frequency a downlink may use, in Hz
    pub min_frequency: u64,
    /// Highest frequency a downlink may use, in Hz
    pub max_frequency: u64,
    /// Uplink channel frequencies in Hz
    pub uplink_channels: Vec<u64>,
    /// Data rates by index
    pub data_rates: BTreeMap<u8, DataRate>,
    /// Default RX2 frequency in Hz
    pub rx2_frequency: u64,
    /// Default RX2 data rate index
    pub rx2_data_rate_index: u8,
    /// Default class B ping slot frequency in Hz
    pub ping_slot_frequency: u64,
    /// Default class B ping slot data rate index
    pub ping_slot_data_rate_index: u8,
    /// Maximum EIRP in dBm
    pub max_eirp: i32,
}

impl FrequencyPlan {
    /// The EU 863-870 MHz plan with the default and common extra channels
    pub fn eu_863_870() -> Self {
        let mut data_rates = BTreeMap::new();
        for (index, spreading_factor) in (7u8..=12).rev().enumerate() {
            data_rates.insert(index as u8, DataRate::LoRa { spreading_factor, bandwidth: 125_000 });
        }
        data_rates.insert(6, DataRate::LoRa { spreading_factor: 7, bandwidth: 250_000 });
        data_rates.insert(7, DataRate::Fsk { bit_rate: 50_000 });

        FrequencyPlan {
            id: EU_863_870.to_string(),
            band_id: "EU_863_870".to_string(),
            min_frequency: 863_000_000,
            max_frequency: 870_000_000,
            uplink_channels: vec![
                868_100_000, 868_300_000, 868_500_000, 867_100_000,
                867_300_000, 867_500_000, 867_700_000, 867_900_000,
            ],
            data_rates,
            rx2_frequency: 869_525_000,
            rx2_data_rate_index: 0,
            ping_slot_frequency: 869_525_000,
            ping_slot_data_rate_index: 3,
            max_eirp: 16,
        }
    }

    /// Returns the data rate with the given index
    pub fn data_rate(&self, index: u8) -> Option<DataRate> {
        self.data_rates.get(&index).copied()
    }

    /// RX1 data rate index for an uplink data rate and RX1 offset
    pub fn rx1_data_rate_index(&self, uplink_index: u8, offset: u8) -> u8 {
        uplink_index.saturating_sub(offset)
    }

    /// Channel mask with every uplink channel enabled
    pub fn default_channel_mask(&self) -> u16 {
        let channels = self.uplink_channels.len().min(16);
        ((1u32 << channels) - 1) as u16
    }

    /// Returns whether a downlink may be transmitted on the frequency
    pub fn allows_downlink(&self, frequency: u64) -> bool {
        frequency >= self.min_frequency && frequency <= self.max_frequency
    }
}

/// Resolves frequency plans by identifier
pub trait FrequencyPlanStore: Send + Sync {
    /// Returns the plan, or `FailedPrecondition` when it cannot be resolved
    fn get(&self, id: &str) -> Result<Arc<FrequencyPlan>>;
}

/// Frequency plans held in memory
#[derive(Default)]
pub struct InMemoryFrequencyPlans {
    plans: DashMap<String, Arc<FrequencyPlan>>,
}

impl InMemoryFrequencyPlans {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store containing the built-in plans
    pub fn with_defaults() -> Self {
        let store = Self::new();
        store.insert(FrequencyPlan::eu_863_870());
        store
    }

    pub fn insert(&self, plan: FrequencyPlan) {
        self.plans.insert(plan.id.clone(), Arc::new(plan));
    }
}

impl FrequencyPlanStore for InMemoryFrequencyPlans {
    fn get(&self, id: &str) -> Result<Arc<FrequencyPlan>> {
        self.plans
            .get(id)
            .map(|plan| Arc::clone(plan.value()))
            .ok_or_else(|| Error::failed_precondition(format!("frequency plan `{}` not available", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eu_data_rates() {
        let plan = FrequencyPlan::eu_863_870();
        assert_eq!(plan.data_rate(0), Some(DataRate::LoRa { spreading_factor: 12, bandwidth: 125_000 }));
        assert_eq!(plan.data_rate(5), Some(DataRate::LoRa { spreading_factor: 7, bandwidth: 125_000 }));
        assert_eq!(plan.data_rate(7), Some(DataRate::Fsk { bit_rate: 50_000 }));
        assert_eq!(plan.data_rate(8), None);
    }

    #[test]
    fn test_rx1_data_rate_and_mask() {
        let plan = FrequencyPlan::eu_863_870();
        assert_eq!(plan.rx1_data_rate_index(5, 0), 5);
        assert_eq!(plan.rx1_data_rate_index(5, 2), 3);
        assert_eq!(plan.rx1_data_rate_index(1, 3), 0);
        assert_eq!(plan.default_channel_mask(), 0x00FF);
    }

    #[test]
    fn test_downlink_band() {
        let plan = FrequencyPlan::eu_863_870();
        assert!(plan.allows_downlink(868_100_000));
        assert!(plan.allows_downlink(869_525_000));
        assert!(!plan.allows_downlink(915_000_000));
        assert!(!plan.allows_downlink(0));
    }

    #[test]
    fn test_store_lookup() {
        let store = InMemoryFrequencyPlans::with_defaults();
        assert_eq!(store.get(EU_863_870).unwrap().rx2_frequency, 869_525_000);
        assert!(store.get("US_902_928").unwrap_err().is_failed_precondition());
    }
}
