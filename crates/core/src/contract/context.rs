use crate::contract::{Contract, Validator};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocationCategory {
    Urban,
    Suburban,
    Rural,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoyaltyStatus {
    Regular,
    Silver,
    Gold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeOfBooking {
    Morning,
    Afternoon,
    Evening,
    Night,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VehicleType {
    Economy,
    Premium,
}

/// Input feature set describing the current ride-pricing conditions.
///
/// Field names on the wire follow the backend's training dataset columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketContext {
    #[serde(rename = "Number_of_Riders")]
    pub number_of_riders: u32,
    #[serde(rename = "Number_of_Drivers")]
    pub number_of_drivers: u32,
    #[serde(rename = "Location_Category")]
    pub location_category: LocationCategory,
    #[serde(rename = "Customer_Loyalty_Status")]
    pub customer_loyalty_status: LoyaltyStatus,
    #[serde(rename = "Number_of_Past_Rides")]
    pub number_of_past_rides: u32,
    #[serde(rename = "Average_Ratings")]
    pub average_ratings: f64,
    #[serde(rename = "Time_of_Booking")]
    pub time_of_booking: TimeOfBooking,
    #[serde(rename = "Vehicle_Type")]
    pub vehicle_type: VehicleType,
    /// Minutes.
    #[serde(rename = "Expected_Ride_Duration")]
    pub expected_ride_duration: u32,
    #[serde(rename = "Historical_Cost_of_Ride")]
    pub historical_cost_of_ride: f64,
}

impl Default for MarketContext {
    fn default() -> Self {
        Self {
            number_of_riders: 50,
            number_of_drivers: 25,
            location_category: LocationCategory::Urban,
            customer_loyalty_status: LoyaltyStatus::Regular,
            number_of_past_rides: 20,
            average_ratings: 4.5,
            time_of_booking: TimeOfBooking::Evening,
            vehicle_type: VehicleType::Economy,
            expected_ride_duration: 30,
            historical_cost_of_ride: 350.0,
        }
    }
}

impl MarketContext {
    /// Riders per available driver; `None` when no drivers are available.
    pub fn supply_demand_ratio(&self) -> Option<f64> {
        if self.number_of_drivers == 0 {
            return None;
        }
        Some(self.number_of_riders as f64 / self.number_of_drivers as f64)
    }
}

impl Contract for MarketContext {
    fn validate(value: &Value, v: &mut Validator) {
        let Some(obj) = v.object(value) else { return };

        for key in [
            "Number_of_Riders",
            "Number_of_Drivers",
            "Number_of_Past_Rides",
            "Expected_Ride_Duration",
        ] {
            let n = v.required_number(obj, key);
            v.integer(obj, key);
            v.min(key, n, 0.0);
        }

        let ratings = v.required_number(obj, "Average_Ratings");
        v.range("Average_Ratings", ratings, 1.0, 5.0);

        let cost = v.required_number(obj, "Historical_Cost_of_Ride");
        v.min("Historical_Cost_of_Ride", cost, 0.0);

        let location = v.required_string(obj, "Location_Category");
        v.one_of("Location_Category", location, &["Urban", "Suburban", "Rural"]);

        let loyalty = v.required_string(obj, "Customer_Loyalty_Status");
        v.one_of("Customer_Loyalty_Status", loyalty, &["Regular", "Silver", "Gold"]);

        let time = v.required_string(obj, "Time_of_Booking");
        v.one_of(
            "Time_of_Booking",
            time,
            &["Morning", "Afternoon", "Evening", "Night"],
        );

        let vehicle = v.required_string(obj, "Vehicle_Type");
        v.one_of("Vehicle_Type", vehicle, &["Economy", "Premium"]);
    }
}
