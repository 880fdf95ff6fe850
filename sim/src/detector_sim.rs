//! Detector and platform-telemetry simulator.
//!
//! Turns ground-truth targets into what the engine would receive:
//! - camera detections with uniform box jitter and confidence noise
//! - radar target lists with position/velocity noise
//! - miss probability (1 - P_D) and uniform clutter boxes
//! - GPS fixes and IMU samples for a slowly drifting platform

use crate::target::Target;
use overwatch_core::types::{DetectionRecord, SensorSource};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use sensor_models::{GpsFix, ImuSample, LidarScan, RadarReport, RadarTarget, SensorPayload};
use serde::{Deserialize, Serialize};

/// Metres per degree of latitude on the simulation sphere.
const METRES_PER_DEGREE: f64 = 111_195.0;
const LIDAR_BEAMS: usize = 16;
const LIDAR_MAX_RANGE: f64 = 40.0;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectorParams {
    /// Probability of detection
    pub p_detection: f64,
    /// Half-width of the uniform box jitter (px)
    pub box_jitter: f64,
    /// Half-width of the uniform radar position noise (m)
    pub radar_noise: f64,
    pub confidence: f64,
    /// Half-width of the uniform confidence noise
    pub confidence_jitter: f64,
    /// Mean clutter boxes per frame
    pub clutter_rate: f64,
    /// Image extent used for clutter (px)
    pub frame_size: [f64; 2],
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            p_detection: 0.95,
            box_jitter: 0.3,
            radar_noise: 1.0,
            confidence: 0.85,
            confidence_jitter: 0.1,
            clutter_rate: 0.0,
            frame_size: [800.0, 600.0],
        }
    }
}

/// Platform path: starts at a geodetic fix and drifts at constant speed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlatformPath {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    /// Northward speed (m/s)
    pub north_speed: f64,
    /// Heading reported by the IMU (rad)
    pub yaw: f64,
    /// Fixed obstacle seen by the LiDAR as (range m, azimuth rad)
    pub obstacle: Option<[f64; 2]>,
}

impl Default for PlatformPath {
    fn default() -> Self {
        Self {
            lat: 48.8566,
            lon: 2.3522,
            alt: 120.0,
            north_speed: 0.5,
            yaw: 0.0,
            obstacle: None,
        }
    }
}

impl PlatformPath {
    pub fn fix_at(&self, t: f64) -> GpsFix {
        GpsFix {
            lat: self.lat + self.north_speed * t / METRES_PER_DEGREE,
            lon: self.lon,
            alt: self.alt,
        }
    }
}

/// Produces one frame of sensor output at a time.
pub struct DetectorSimulator {
    pub params: DetectorParams,
    pub platform: PlatformPath,
    rng: ChaCha8Rng,
    next_record_id: u64,
}

impl DetectorSimulator {
    pub fn new(params: DetectorParams, platform: PlatformPath, seed: u64) -> Self {
        Self {
            params,
            platform,
            rng: ChaCha8Rng::seed_from_u64(seed),
            next_record_id: 0,
        }
    }

    fn uniform(&mut self, half_width: f64) -> f64 {
        self.rng.gen::<f64>() * half_width * 2.0 - half_width
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_record_id;
        self.next_record_id += 1;
        id
    }

    /// Camera detections for all visible camera targets plus clutter.
    pub fn detections(&mut self, targets: &[Target], t: f64) -> Vec<DetectionRecord> {
        let mut out = Vec::new();
        for target in targets {
            if target.source == SensorSource::Radar || !target.is_visible(t) {
                continue;
            }
            // Miss detection?
            if self.rng.gen::<f64>() > self.params.p_detection {
                continue;
            }
            let j = self.params.box_jitter;
            let bbox = target.bbox().map(|v| v + self.uniform(j));
            let c = self.params.confidence + self.uniform(self.params.confidence_jitter);
            let mut record = DetectionRecord::image(target.source, &target.class_name, c.clamp(0.0, 1.0), bbox, t);
            record.id = self.next_id();
            out.push(record);
        }

        // Clutter: approximate Poisson by drawing until the product of U < e^{-lambda}
        let lambda = self.params.clutter_rate;
        if lambda > 0.0 {
            let threshold = (-lambda).exp();
            let mut prod = self.rng.gen::<f64>();
            while prod > threshold && out.len() < 200 {
                prod *= self.rng.gen::<f64>();
                let [w, h] = self.params.frame_size;
                let x = self.rng.gen::<f64>() * (w - 20.0);
                let y = self.rng.gen::<f64>() * (h - 20.0);
                let mut record =
                    DetectionRecord::image(SensorSource::Visual, "unknown", 0.3, [x, y, x + 12.0, y + 12.0], t);
                record.id = self.next_id();
                out.push(record);
            }
        }
        out
    }

    /// Radar report for visible radar targets, if any.
    pub fn radar_report(&mut self, targets: &[Target], t: f64) -> Option<RadarReport> {
        let mut report = RadarReport { targets: Vec::new() };
        for target in targets {
            if target.source != SensorSource::Radar || !target.is_visible(t) {
                continue;
            }
            if self.rng.gen::<f64>() > self.params.p_detection {
                continue;
            }
            let n = self.params.radar_noise;
            let [x, y, vx, vy] = target.state;
            report.targets.push(RadarTarget {
                position: [x + self.uniform(n), y + self.uniform(n), 0.0],
                velocity: [vx, vy, 0.0],
                class_name: Some(target.class_name.clone()),
                confidence: Some(self.params.confidence),
            });
        }
        (!report.targets.is_empty()).then_some(report)
    }

    /// One sweep of evenly spaced beams; the beam closest to the obstacle
    /// azimuth returns its range, the rest return max range.
    fn lidar_scan(&mut self, obstacle: [f64; 2]) -> LidarScan {
        let [range, azimuth] = obstacle;
        let spacing = std::f64::consts::TAU / LIDAR_BEAMS as f64;
        let hit = (azimuth.rem_euclid(std::f64::consts::TAU) / spacing).round() as usize % LIDAR_BEAMS;
        let angles: Vec<f64> = (0..LIDAR_BEAMS).map(|i| i as f64 * spacing).collect();
        let distances = (0..LIDAR_BEAMS)
            .map(|i| {
                if i == hit {
                    range + self.uniform(0.05)
                } else {
                    LIDAR_MAX_RANGE
                }
            })
            .collect();
        LidarScan {
            distances,
            angles,
            intensities: Vec::new(),
        }
    }

    /// GPS fix, IMU sample and (with an obstacle configured) a LiDAR scan
    /// for time `t`.
    pub fn telemetry(&mut self, t: f64) -> Vec<SensorPayload> {
        let imu = ImuSample {
            roll: self.uniform(0.01),
            pitch: self.uniform(0.01),
            yaw: self.platform.yaw + self.uniform(0.01),
            ax: self.uniform(0.05),
            ay: self.uniform(0.05),
            az: 9.81 + self.uniform(0.05),
        };
        let mut out = vec![SensorPayload::Gps(self.platform.fix_at(t)), SensorPayload::Imu(imu)];
        if let Some(obstacle) = self.platform.obstacle {
            out.push(SensorPayload::Lidar(self.lidar_scan(obstacle)));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_detector_sees_every_camera_target() {
        let params = DetectorParams {
            p_detection: 1.0,
            ..DetectorParams::default()
        };
        let mut sim = DetectorSimulator::new(params, PlatformPath::default(), 7);
        let targets = vec![
            Target::camera(0, "person", SensorSource::Visual, [100.0, 100.0, 0.0, 0.0], [10.0, 20.0]),
            Target::camera(1, "car", SensorSource::Thermal, [300.0, 100.0, 0.0, 0.0], [30.0, 15.0]),
            Target::radar(2, "drone", [500.0, 0.0, -10.0, 0.0]),
        ];
        let dets = sim.detections(&targets, 0.0);
        assert_eq!(dets.len(), 2);
        assert!(dets.iter().all(|d| d.validate().is_ok()));
        assert_ne!(dets[0].id, dets[1].id);

        let report = sim.radar_report(&targets, 0.0).unwrap();
        assert_eq!(report.targets.len(), 1);
        assert_eq!(report.targets[0].velocity, [-10.0, 0.0, 0.0]);
    }

    #[test]
    fn platform_drifts_north() {
        let path = PlatformPath::default();
        let a = path.fix_at(0.0);
        let b = path.fix_at(100.0);
        assert!(b.lat > a.lat);
        assert_eq!(a.lon, b.lon);
    }

    #[test]
    fn lidar_sees_configured_obstacle() {
        let path = PlatformPath {
            obstacle: Some([6.0, std::f64::consts::FRAC_PI_2]),
            ..PlatformPath::default()
        };
        let mut sim = DetectorSimulator::new(DetectorParams::default(), path, 1);
        let sensors = sim.telemetry(0.0);
        assert_eq!(sensors.len(), 3);
        let SensorPayload::Lidar(scan) = &sensors[2] else {
            panic!("expected a lidar scan");
        };
        assert!(scan.validate().is_ok());
        let near = scan.near_returns(10.0);
        assert_eq!(near.len(), 1);
        assert!((near[0].azimuth - std::f64::consts::FRAC_PI_2).abs() < 1e-9);
    }
}
