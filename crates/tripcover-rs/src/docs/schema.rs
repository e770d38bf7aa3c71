//! Type-specific extraction schemas.
//!
//! Each supported document type has a typed field struct (the JSON Schema
//! embedded in the extraction prompt and validated over the LLM reply) and
//! a fixed list of expected scalar field paths that bucketing must account
//! for. All fields are optional at the schema level — absence is handled by
//! the bucketing stage, not by validation failure.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The four supported document types, plus unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    FlightConfirmation,
    HotelBooking,
    VisaApplication,
    Itinerary,
    Unknown,
}

impl DocumentType {
    pub fn label(&self) -> &'static str {
        match self {
            DocumentType::FlightConfirmation => "flight_confirmation",
            DocumentType::HotelBooking => "hotel_booking",
            DocumentType::VisaApplication => "visa_application",
            DocumentType::Itinerary => "itinerary",
            DocumentType::Unknown => "unknown",
        }
    }

    pub fn from_label(label: &str) -> DocumentType {
        match label {
            "flight_confirmation" => DocumentType::FlightConfirmation,
            "hotel_booking" => DocumentType::HotelBooking,
            "visa_application" => DocumentType::VisaApplication,
            "itinerary" => DocumentType::Itinerary,
            _ => DocumentType::Unknown,
        }
    }

    /// The scalar field paths the type schema expects. Bucketing must place
    /// each of these in exactly one of high/low/missing.
    pub fn expected_paths(&self) -> &'static [&'static str] {
        match self {
            DocumentType::FlightConfirmation => &[
                "airline",
                "flight_number_outbound",
                "departure.date",
                "departure.time",
                "departure.airport_code",
                "destination.country",
                "destination.city",
                "destination.airport_code",
                "pnr",
                "travelers",
                "trip_duration_days",
                "trip_type",
            ],
            DocumentType::HotelBooking => &[
                "hotel_name",
                "address.country",
                "address.city",
                "check_in_date",
                "check_out_date",
                "nights_count",
                "guests",
                "room_type",
            ],
            DocumentType::VisaApplication => &[
                "visa_type",
                "destination_country",
                "applicant.full_name",
                "applicant.date_of_birth",
                "applicant.passport_number",
                "applicant.nationality",
                "intended_arrival_date",
                "intended_departure_date",
                "duration_days",
            ],
            DocumentType::Itinerary => &[
                "trip_title",
                "destinations",
                "start_date",
                "end_date",
                "activities",
                "has_adventure_sports",
                "adventure_sports_activities",
            ],
            DocumentType::Unknown => &[],
        }
    }

    /// JSON Schema for the type's field struct, embedded in the extraction
    /// prompt and used to validate the reply.
    pub fn fields_schema(&self) -> Option<serde_json::Value> {
        match self {
            DocumentType::FlightConfirmation => {
                Some(crate::json_schema_for::<FlightConfirmationFields>())
            }
            DocumentType::HotelBooking => Some(crate::json_schema_for::<HotelBookingFields>()),
            DocumentType::VisaApplication => Some(crate::json_schema_for::<VisaApplicationFields>()),
            DocumentType::Itinerary => Some(crate::json_schema_for::<ItineraryFields>()),
            DocumentType::Unknown => None,
        }
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ── Flight confirmation ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FlightLeg {
    pub date: Option<String>,
    pub time: Option<String>,
    pub airport_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FlightDestination {
    pub country: Option<String>,
    pub city: Option<String>,
    pub airport_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TravelerName {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FlightConfirmationFields {
    pub airline: Option<String>,
    pub flight_number_outbound: Option<String>,
    pub flight_number_inbound: Option<String>,
    pub departure: Option<FlightLeg>,
    #[serde(rename = "return")]
    pub return_leg: Option<FlightLeg>,
    pub destination: Option<FlightDestination>,
    pub pnr: Option<String>,
    pub travelers: Option<Vec<TravelerName>>,
    pub trip_duration_days: Option<i64>,
    /// `"one_way"` or `"return"`.
    pub trip_type: Option<String>,
}

// ── Hotel booking ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct HotelAddress {
    pub country: Option<String>,
    pub city: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct HotelBookingFields {
    pub hotel_name: Option<String>,
    pub address: Option<HotelAddress>,
    pub check_in_date: Option<String>,
    pub check_out_date: Option<String>,
    pub nights_count: Option<i64>,
    pub guests: Option<i64>,
    pub room_type: Option<String>,
}

// ── Visa application ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VisaApplicant {
    pub full_name: Option<String>,
    pub date_of_birth: Option<String>,
    pub passport_number: Option<String>,
    pub nationality: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VisaApplicationFields {
    pub visa_type: Option<String>,
    pub destination_country: Option<String>,
    pub applicant: Option<VisaApplicant>,
    pub intended_arrival_date: Option<String>,
    pub intended_departure_date: Option<String>,
    pub duration_days: Option<i64>,
}

// ── Itinerary ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ItineraryStop {
    pub country: Option<String>,
    pub city: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ItineraryActivity {
    pub name: Option<String>,
    pub location: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ItineraryFields {
    pub trip_title: Option<String>,
    pub destinations: Option<Vec<ItineraryStop>>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub activities: Option<Vec<ItineraryActivity>>,
    pub has_adventure_sports: Option<bool>,
    pub adventure_sports_activities: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_round_trip() {
        for doc_type in [
            DocumentType::FlightConfirmation,
            DocumentType::HotelBooking,
            DocumentType::VisaApplication,
            DocumentType::Itinerary,
            DocumentType::Unknown,
        ] {
            assert_eq!(DocumentType::from_label(doc_type.label()), doc_type);
        }
        assert_eq!(DocumentType::from_label("payslip"), DocumentType::Unknown);
    }

    #[test]
    fn every_known_type_has_paths_and_schema() {
        for doc_type in [
            DocumentType::FlightConfirmation,
            DocumentType::HotelBooking,
            DocumentType::VisaApplication,
            DocumentType::Itinerary,
        ] {
            assert!(!doc_type.expected_paths().is_empty());
            assert!(doc_type.fields_schema().is_some());
        }
        assert!(DocumentType::Unknown.expected_paths().is_empty());
        assert!(DocumentType::Unknown.fields_schema().is_none());
    }

    #[test]
    fn flight_fields_deserialize_with_return_rename() {
        let json = serde_json::json!({
            "airline": "ANA",
            "departure": {"date": "2025-12-15", "time": "09:40", "airport_code": "SIN"},
            "return": {"date": "2025-12-22", "time": "17:05", "airport_code": "HND"},
            "travelers": [{"first_name": "Yuki", "last_name": "Tanaka"}]
        });
        let fields: FlightConfirmationFields = serde_json::from_value(json).unwrap();
        assert!(fields.return_leg.is_some());
        assert_eq!(fields.travelers.unwrap().len(), 1);
    }
}
