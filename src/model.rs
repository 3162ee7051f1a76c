//! Data models for traffic surveys.
//!
//! # Overview
//!
//! A survey produces one [`SurveyRecord`]: the vehicle counts gathered during
//! the timed counting window, the surveyor's qualitative observations, and a
//! few derived fields (interval label, peak/off-peak classification).
//!
//! All wire representations use the display strings of the survey
//! form (`"Mixed-use"`, `"Peak Hour Rush"`, ...) and camelCase field names,
//! so a browser front-end can round-trip them unchanged.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, SecondsFormat, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// A vehicle category counted during a survey.
///
/// The set is closed: every survey counts exactly these four.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VehicleCategory {
    /// Motorcycles, scooters, bicycles.
    TwoWheeler,
    /// Auto-rickshaws and similar.
    ThreeWheeler,
    /// Cars, vans, light trucks.
    FourWheeler,
    /// Buses, lorries, construction vehicles.
    Heavy,
}

impl VehicleCategory {
    /// All categories, in display order.
    pub const ALL: [VehicleCategory; 4] = [
        VehicleCategory::TwoWheeler,
        VehicleCategory::ThreeWheeler,
        VehicleCategory::FourWheeler,
        VehicleCategory::Heavy,
    ];

    /// Get a human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            VehicleCategory::TwoWheeler => "2-Wheelers",
            VehicleCategory::ThreeWheeler => "3-Wheelers",
            VehicleCategory::FourWheeler => "4-Wheelers",
            VehicleCategory::Heavy => "Heavy Vehicles",
        }
    }

    /// Short column header used in report tables.
    pub fn short_label(&self) -> &'static str {
        match self {
            VehicleCategory::TwoWheeler => "2W",
            VehicleCategory::ThreeWheeler => "3W",
            VehicleCategory::FourWheeler => "4W",
            VehicleCategory::Heavy => "Heavy",
        }
    }
}

/// Vehicle counts for one survey, one non-negative integer per category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleCounts {
    pub two_wheelers: u32,
    pub three_wheelers: u32,
    pub four_wheelers: u32,
    pub heavy_vehicles: u32,
}

impl VehicleCounts {
    /// Count for a single category.
    pub fn get(&self, category: VehicleCategory) -> u32 {
        match category {
            VehicleCategory::TwoWheeler => self.two_wheelers,
            VehicleCategory::ThreeWheeler => self.three_wheelers,
            VehicleCategory::FourWheeler => self.four_wheelers,
            VehicleCategory::Heavy => self.heavy_vehicles,
        }
    }

    pub(crate) fn get_mut(&mut self, category: VehicleCategory) -> &mut u32 {
        match category {
            VehicleCategory::TwoWheeler => &mut self.two_wheelers,
            VehicleCategory::ThreeWheeler => &mut self.three_wheelers,
            VehicleCategory::FourWheeler => &mut self.four_wheelers,
            VehicleCategory::Heavy => &mut self.heavy_vehicles,
        }
    }

    /// Sum over all categories.
    pub fn total(&self) -> u64 {
        VehicleCategory::ALL
            .iter()
            .map(|c| u64::from(self.get(*c)))
            .sum()
    }
}

/// Error returned when a string is not one of an enum's display values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub value: String,
    pub expected: &'static [&'static str],
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' is not one of: {}",
            self.value,
            self.expected.join(", ")
        )
    }
}

impl std::error::Error for UnknownVariant {}

/// Closed enums whose wire value is their display label.
macro_rules! labelled_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($(#[$vmeta:meta])* $variant:ident => $label:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                #[serde(rename = $label)]
                $variant,
            )+
        }

        impl $name {
            /// Every accepted display value, in order.
            pub const LABELS: &'static [&'static str] = &[$($label),+];

            /// Get a human-readable label.
            pub fn label(&self) -> &'static str {
                match self {
                    $($name::$variant => $label,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim() {
                    $($label => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        value: other.to_string(),
                        expected: Self::LABELS,
                    }),
                }
            }
        }
    };
}

labelled_enum! {
    /// Ordinal scale used for every qualitative observation.
    ///
    /// Ordering follows declaration: `Less < Moderate < Normal < High`.
    Rating {
        Less => "Less",
        Moderate => "Moderate",
        Normal => "Normal",
        High => "High",
    }
}

labelled_enum! {
    /// Land use around the surveyed road.
    Locality {
        Residential => "Residential",
        Commercial => "Commercial",
        Industrial => "Industrial",
        MixedUse => "Mixed-use",
    }
}

labelled_enum! {
    /// Primary cause of congestion observed by the surveyor.
    CongestionCause {
        PeakHourRush => "Peak Hour Rush",
        RoadWork => "Road Work",
        Accident => "Accident",
        SpecialEvent => "Special Event",
        None => "None",
    }
}

labelled_enum! {
    /// Time-of-day classification of a survey.
    TrafficTime {
        Peak => "Peak Time",
        Normal => "Normal Time",
    }
}

impl TrafficTime {
    /// Classify a wall-clock hour (0-23).
    ///
    /// Peak windows are 08:00-10:59 and 17:00-19:59.
    pub fn from_hour(hour: u32) -> Self {
        if (8..=10).contains(&hour) || (17..=19).contains(&hour) {
            TrafficTime::Peak
        } else {
            TrafficTime::Normal
        }
    }

    /// Classify using the local wall-clock hour of a timestamp.
    pub fn classify(at: &DateTime<FixedOffset>) -> Self {
        Self::from_hour(at.hour())
    }
}

/// Validated qualitative observations for one survey.
///
/// Only constructed by [`crate::form::DetailsSubmission::validate`], so every
/// field is guaranteed to hold a valid enum value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationDetails {
    pub human_flow: Rating,
    pub jams: Rating,
    pub delays: Rating,
    pub signals: Rating,
    pub wrong_direction: Rating,
    pub locality: Locality,
    pub congestion_cause: CongestionCause,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
}

/// One finalized survey.
///
/// Immutable after creation. The id is the creation timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyRecord {
    /// Creation timestamp, RFC 3339 with millisecond precision.
    pub id: String,

    /// When the record was created (UTC).
    pub recorded_at: DateTime<Utc>,

    #[serde(flatten)]
    pub counts: VehicleCounts,

    #[serde(flatten)]
    pub details: ObservationDetails,

    /// Declared interval, e.g. "5 minute(s)".
    pub time_interval: String,

    /// Peak/off-peak classification at submission time.
    pub traffic_time: TrafficTime,
}

impl SurveyRecord {
    /// Build a record from frozen counts and validated details.
    ///
    /// `submitted_at` carries the surveyor's local offset; peak
    /// classification uses its wall-clock hour.
    pub fn new(
        counts: VehicleCounts,
        details: ObservationDetails,
        duration_minutes: u32,
        submitted_at: DateTime<FixedOffset>,
    ) -> Self {
        let recorded_at = submitted_at.with_timezone(&Utc);
        Self {
            id: recorded_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            recorded_at,
            counts,
            details,
            time_interval: interval_label(duration_minutes),
            traffic_time: TrafficTime::classify(&submitted_at),
        }
    }
}

/// Label for a declared survey duration.
pub fn interval_label(duration_minutes: u32) -> String {
    format!("{} minute(s)", duration_minutes)
}

/// Analysis of the most recently completed survey.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    /// Id of the [`SurveyRecord`] this analysis describes.
    pub record_id: String,
    pub conclusion: String,
    pub precautions: String,
    pub suggestions: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_details() -> ObservationDetails {
        ObservationDetails {
            human_flow: Rating::High,
            jams: Rating::Normal,
            delays: Rating::Less,
            signals: Rating::Normal,
            wrong_direction: Rating::Less,
            locality: Locality::Commercial,
            congestion_cause: CongestionCause::PeakHourRush,
            remarks: None,
        }
    }

    #[test]
    fn test_rating_order() {
        assert!(Rating::Less < Rating::Moderate);
        assert!(Rating::Moderate < Rating::Normal);
        assert!(Rating::Normal < Rating::High);
    }

    #[test]
    fn test_labels_parse_back() {
        assert_eq!("Mixed-use".parse::<Locality>(), Ok(Locality::MixedUse));
        assert_eq!(
            " Special Event ".parse::<CongestionCause>(),
            Ok(CongestionCause::SpecialEvent)
        );
        assert_eq!(CongestionCause::None.to_string(), "None");

        let err = "Very High".parse::<Rating>().unwrap_err();
        assert_eq!(err.value, "Very High");
        assert!(err.to_string().contains("Less, Moderate, Normal, High"));
    }

    #[test]
    fn test_traffic_time_windows() {
        for hour in [8, 9, 10, 17, 18, 19] {
            assert_eq!(TrafficTime::from_hour(hour), TrafficTime::Peak, "hour {hour}");
        }
        for hour in [0, 7, 11, 12, 16, 20, 23] {
            assert_eq!(TrafficTime::from_hour(hour), TrafficTime::Normal, "hour {hour}");
        }
    }

    #[test]
    fn test_record_uses_local_hour_for_classification() {
        // 09:30 local at +05:30 is 04:00 UTC
        let offset = FixedOffset::east_opt(5 * 3600 + 1800).unwrap();
        let submitted_at = offset.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();

        let record = SurveyRecord::new(VehicleCounts::default(), sample_details(), 5, submitted_at);

        assert_eq!(record.traffic_time, TrafficTime::Peak);
        assert_eq!(record.time_interval, "5 minute(s)");
        assert_eq!(record.id, "2024-03-01T04:00:00.000Z");
    }

    #[test]
    fn test_record_serializes_flat() {
        let submitted_at = Utc
            .with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
            .unwrap()
            .fixed_offset();
        let counts = VehicleCounts {
            two_wheelers: 5,
            four_wheelers: 2,
            ..Default::default()
        };

        let record = SurveyRecord::new(counts, sample_details(), 1, submitted_at);
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["twoWheelers"], 5);
        assert_eq!(json["fourWheelers"], 2);
        assert_eq!(json["humanFlow"], "High");
        assert_eq!(json["congestionCause"], "Peak Hour Rush");
        assert_eq!(json["trafficTime"], "Normal Time");
        assert!(json.get("remarks").is_none());
    }

    #[test]
    fn test_counts_total() {
        let counts = VehicleCounts {
            two_wheelers: 3,
            three_wheelers: 1,
            four_wheelers: 4,
            heavy_vehicles: 2,
        };
        assert_eq!(counts.total(), 10);
        assert_eq!(counts.get(VehicleCategory::Heavy), 2);
    }
}
