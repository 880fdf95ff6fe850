//! `sensor_models` — Observation models, typed platform sensor payloads,
//! geodetic conversion.

pub mod geo;
pub mod observation;
pub mod readings;

pub use geo::GeoOrigin;
pub use observation::{
    AttitudeObservation, ObservationModel, PolarObservation, PositionObservation,
    PositionVelocityObservation,
};
pub use readings::{
    GpsFix, ImuSample, LidarReturn, LidarScan, RadarReport, RadarTarget, ReadingError,
    SensorKind, SensorPayload,
};
