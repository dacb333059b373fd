//! Per-cabin cycle detection state machine.
//!
//! Each cabin owns its own [`CabinFsm`] instance; the [`FsmManager`] is
//! just an array keyed by cabin index, with no cross-cabin messaging. This
//! keeps the detection logic free of any shared mutable state between
//! cabins.

use ldpj_common::CycleDetectionConfig;
use ldpj_transport::CabinFrame;

/// Cycle detection state for one cabin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CabinState {
    /// Waiting for a qualifying pressure drop.
    Idle,
    /// Accumulating a cycle's samples.
    Collecting,
    /// Cycle complete, awaiting harvest + reset by the processing loop.
    Processing,
    /// Collection ran past `collection_timeout_s` without ending.
    Fault,
}

impl std::fmt::Display for CabinState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "IDLE",
            Self::Collecting => "COLLECTING",
            Self::Processing => "PROCESSING",
            Self::Fault => "FAULT",
        };
        write!(f, "{s}")
    }
}

/// Per-cabin accumulator built up while a cabin is COLLECTING.
#[derive(Debug, Clone, Default)]
pub struct CycleData {
    /// Cycle start timestamp (monotonic seconds), set on IDLE -> COLLECTING.
    pub start_time: f64,
    /// Pressure series, one per sample.
    pub pressures: Vec<f64>,
    /// Angle series, parallel to `pressures`.
    pub angles: Vec<f64>,
    /// Sample timestamps, parallel to `pressures`.
    pub timestamps: Vec<f64>,
    /// Raw analog readings, parallel to `pressures`.
    pub analog: Vec<i16>,
    /// Position readings, parallel to `pressures`.
    pub positions: Vec<i16>,
}

impl CycleData {
    fn new(start_time: f64) -> Self {
        Self {
            start_time,
            ..Default::default()
        }
    }

    fn push(&mut self, frame: &CabinFrame) {
        self.pressures.push(f64::from(frame.pressure));
        self.angles.push(f64::from(frame.angle));
        self.timestamps.push(frame.timestamp);
        self.analog.push(frame.analog);
        self.positions.push(frame.position);
    }

    /// Number of samples collected so far.
    #[must_use]
    pub fn point_count(&self) -> usize {
        self.pressures.len()
    }

    /// Whether the accumulator has no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pressures.is_empty()
    }
}

/// One cabin's cycle detection state machine.
#[derive(Debug, Clone)]
pub struct CabinFsm {
    cabin_index: usize,
    cfg: CycleDetectionConfig,
    state: CabinState,
    last_pressure: Option<f64>,
    data: CycleData,
}

impl CabinFsm {
    /// Create a fresh FSM for `cabin_index`, starting IDLE with no data and
    /// no observed pressure baseline.
    #[must_use]
    pub fn new(cabin_index: usize, cfg: CycleDetectionConfig) -> Self {
        Self {
            cabin_index,
            cfg,
            state: CabinState::Idle,
            last_pressure: None,
            data: CycleData::default(),
        }
    }

    /// This FSM's cabin index.
    #[must_use]
    pub fn cabin_index(&self) -> usize {
        self.cabin_index
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> CabinState {
        self.state
    }

    /// Number of points collected in the current (or just-harvested) cycle.
    #[must_use]
    pub fn point_count(&self) -> usize {
        self.data.point_count()
    }

    /// Cycle start time of the current collection, if any.
    #[must_use]
    pub fn collection_start_time(&self) -> Option<f64> {
        (!self.data.is_empty()).then_some(self.data.start_time)
    }

    /// Feed one sample to the state machine, returning the resulting state.
    ///
    /// This is the only mutator besides [`Self::reset`],
    /// [`Self::harvest`], [`Self::force_fault`] and [`Self::clear_fault`].
    /// The last-pressure baseline is updated at the end of this call
    /// regardless of which state is entered, so a clean IDLE resume sees
    /// the current pressure as its next `P-1`.
    pub fn update(&mut self, frame: &CabinFrame) -> CabinState {
        let ts = frame.timestamp;
        let p = f64::from(frame.pressure);

        self.state = match self.state {
            CabinState::Idle => self.try_start(p, ts, frame),
            CabinState::Collecting => self.advance_collecting(p, ts, frame),
            CabinState::Processing => CabinState::Processing,
            CabinState::Fault => CabinState::Fault,
        };

        self.last_pressure = Some(p);
        self.state
    }

    fn try_start(&mut self, p: f64, ts: f64, frame: &CabinFrame) -> CabinState {
        let Some(last) = self.last_pressure else {
            return CabinState::Idle;
        };
        if last - p >= self.cfg.start_pressure_drop {
            let mut data = CycleData::new(ts);
            data.push(frame);
            self.data = data;
            CabinState::Collecting
        } else {
            CabinState::Idle
        }
    }

    fn advance_collecting(&mut self, p: f64, ts: f64, frame: &CabinFrame) -> CabinState {
        self.data.push(frame);
        let last = self.last_pressure.unwrap_or(p);
        let point_count = self.data.point_count();
        let elapsed = ts - self.data.start_time;

        if p - last >= self.cfg.end_pressure_rise && point_count >= self.cfg.min_collection_points
        {
            CabinState::Processing
        } else if point_count >= self.cfg.max_collection_points {
            CabinState::Processing
        } else if elapsed >= self.cfg.max_collection_duration_s {
            CabinState::Processing
        } else if elapsed >= self.cfg.collection_timeout_s {
            CabinState::Fault
        } else {
            CabinState::Collecting
        }
    }

    /// Return the accumulated data for a PROCESSING cabin without changing
    /// state; the caller is expected to call [`Self::reset`] afterwards.
    #[must_use]
    pub fn harvest(&self) -> CycleData {
        self.data.clone()
    }

    /// Transition PROCESSING -> IDLE and drop the accumulated data.
    pub fn reset(&mut self) {
        self.state = CabinState::Idle;
        self.data = CycleData::default();
    }

    /// Force a transition into FAULT, dropping any in-progress data.
    pub fn force_fault(&mut self) {
        self.state = CabinState::Fault;
    }

    /// Transition FAULT -> IDLE.
    pub fn clear_fault(&mut self) {
        self.state = CabinState::Idle;
        self.data = CycleData::default();
    }
}

/// Owns one [`CabinFsm`] per cabin, keyed by cabin index.
#[derive(Debug)]
pub struct FsmManager {
    fsms: Vec<CabinFsm>,
}

impl FsmManager {
    /// Build a manager with `cabin_count` fresh FSMs.
    #[must_use]
    pub fn new(cabin_count: usize, cfg: CycleDetectionConfig) -> Self {
        Self {
            fsms: (0..cabin_count).map(|i| CabinFsm::new(i, cfg)).collect(),
        }
    }

    /// Number of cabins managed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fsms.len()
    }

    /// Whether this manager has no cabins.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fsms.is_empty()
    }

    /// Borrow one cabin's FSM.
    #[must_use]
    pub fn get(&self, cabin_index: usize) -> Option<&CabinFsm> {
        self.fsms.get(cabin_index)
    }

    /// Mutably borrow one cabin's FSM.
    pub fn get_mut(&mut self, cabin_index: usize) -> Option<&mut CabinFsm> {
        self.fsms.get_mut(cabin_index)
    }

    /// Feed every cabin frame present in a poll frame to its matching FSM.
    /// Cabins absent from a truncated read are simply not updated.
    pub fn update_all(&mut self, cabins: &[CabinFrame]) {
        for frame in cabins {
            if let Some(fsm) = self.fsms.get_mut(frame.cabin_index) {
                fsm.update(frame);
            }
        }
    }

    /// Iterate over all managed FSMs.
    pub fn iter(&self) -> impl Iterator<Item = &CabinFsm> {
        self.fsms.iter()
    }

    /// Mutably iterate over all managed FSMs.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut CabinFsm> {
        self.fsms.iter_mut()
    }

    /// Indices of cabins currently in `state`.
    #[must_use]
    pub fn indices_in_state(&self, state: CabinState) -> Vec<usize> {
        self.fsms
            .iter()
            .filter(|f| f.state() == state)
            .map(CabinFsm::cabin_index)
            .collect()
    }

    /// Indices of cabins that have been COLLECTING since before
    /// `now - max_duration_s`, for the health checker's FSM-stuck probe.
    #[must_use]
    pub fn stuck_cabins(&self, now: f64, max_duration_s: f64) -> Vec<usize> {
        self.fsms
            .iter()
            .filter(|f| {
                f.state() == CabinState::Collecting
                    && f.collection_start_time()
                        .is_some_and(|start| now - start > max_duration_s)
            })
            .map(CabinFsm::cabin_index)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(cabin_index: usize, pressure: f32, timestamp: f64) -> CabinFrame {
        CabinFrame {
            cabin_index,
            analog: 0,
            pressure,
            position: 0,
            angle: 0.0,
            timestamp,
        }
    }

    fn cfg() -> CycleDetectionConfig {
        CycleDetectionConfig {
            start_pressure_drop: 50.0,
            end_pressure_rise: 50.0,
            min_collection_points: 100,
            max_collection_points: 3000,
            max_collection_duration_s: 45.0,
            collection_timeout_s: 60.0,
            idle_pressure_min: 0.0,
        }
    }

    #[test]
    fn test_fsm_start_transition() {
        let mut fsm = CabinFsm::new(0, CycleDetectionConfig {
            start_pressure_drop: 50.0,
            ..cfg()
        });
        assert_eq!(fsm.update(&frame(0, 1000.0, 0.0)), CabinState::Idle);
        assert_eq!(fsm.update(&frame(0, 940.0, 0.01)), CabinState::Collecting);
        assert_eq!(fsm.point_count(), 1);
    }

    #[test]
    fn test_fsm_idle_without_baseline_stays_idle() {
        let mut fsm = CabinFsm::new(0, cfg());
        assert_eq!(fsm.update(&frame(0, 10.0, 0.0)), CabinState::Idle);
    }

    #[test]
    fn test_fsm_max_points_terminates_cycle() {
        let mut fsm = CabinFsm::new(
            0,
            CycleDetectionConfig {
                max_collection_points: 10,
                min_collection_points: 3,
                ..cfg()
            },
        );
        fsm.update(&frame(0, 1000.0, 0.0));
        fsm.update(&frame(0, 940.0, 0.1));
        let mut ts = 0.2;
        let mut state = CabinState::Collecting;
        for _ in 0..10 {
            state = fsm.update(&frame(0, 500.0, ts));
            ts += 0.1;
        }
        assert_eq!(state, CabinState::Processing);
        assert!(fsm.point_count() >= 10);
    }

    #[test]
    fn test_fsm_end_by_rise_requires_min_points() {
        let mut fsm = CabinFsm::new(
            0,
            CycleDetectionConfig {
                end_pressure_rise: 50.0,
                min_collection_points: 5,
                ..cfg()
            },
        );
        fsm.update(&frame(0, 1000.0, 0.0));
        fsm.update(&frame(0, 940.0, 0.1));
        // A rise before min_collection_points is reached must not end the cycle.
        let state = fsm.update(&frame(0, 1000.0, 0.2));
        assert_eq!(state, CabinState::Collecting);
    }

    #[test]
    fn test_fsm_end_by_rise_after_min_points() {
        let mut fsm = CabinFsm::new(
            0,
            CycleDetectionConfig {
                end_pressure_rise: 50.0,
                min_collection_points: 2,
                ..cfg()
            },
        );
        fsm.update(&frame(0, 1000.0, 0.0));
        fsm.update(&frame(0, 940.0, 0.1));
        fsm.update(&frame(0, 935.0, 0.2));
        let state = fsm.update(&frame(0, 990.0, 0.3));
        assert_eq!(state, CabinState::Processing);
    }

    #[test]
    fn test_fsm_collection_timeout_faults() {
        let mut fsm = CabinFsm::new(
            0,
            CycleDetectionConfig {
                collection_timeout_s: 1.0,
                max_collection_duration_s: 1000.0,
                max_collection_points: 1_000_000,
                end_pressure_rise: 1_000_000.0,
                ..cfg()
            },
        );
        fsm.update(&frame(0, 1000.0, 0.0));
        fsm.update(&frame(0, 940.0, 0.1));
        let state = fsm.update(&frame(0, 941.0, 2.0));
        assert_eq!(state, CabinState::Fault);
    }

    #[test]
    fn test_harvest_then_reset_returns_to_idle_with_empty_data() {
        let mut fsm = CabinFsm::new(
            0,
            CycleDetectionConfig {
                max_collection_points: 2,
                min_collection_points: 1,
                ..cfg()
            },
        );
        fsm.update(&frame(0, 1000.0, 0.0));
        fsm.update(&frame(0, 940.0, 0.1));
        fsm.update(&frame(0, 935.0, 0.2));
        assert_eq!(fsm.state(), CabinState::Processing);

        let data = fsm.harvest();
        assert!(data.point_count() >= 2);
        assert_eq!(fsm.state(), CabinState::Processing);

        fsm.reset();
        assert_eq!(fsm.state(), CabinState::Idle);
        assert_eq!(fsm.point_count(), 0);
    }

    #[test]
    fn test_clear_fault_returns_to_idle() {
        let mut fsm = CabinFsm::new(0, cfg());
        fsm.force_fault();
        assert_eq!(fsm.state(), CabinState::Fault);
        fsm.clear_fault();
        assert_eq!(fsm.state(), CabinState::Idle);
    }

    #[test]
    fn test_manager_dispatches_by_cabin_index_only() {
        let mut mgr = FsmManager::new(3, cfg());
        mgr.update_all(&[frame(0, 1000.0, 0.0), frame(2, 500.0, 0.0)]);
        mgr.update_all(&[frame(0, 940.0, 0.1)]);
        assert_eq!(mgr.get(0).unwrap().state(), CabinState::Collecting);
        assert_eq!(mgr.get(1).unwrap().state(), CabinState::Idle);
        assert_eq!(mgr.get(2).unwrap().state(), CabinState::Idle);
    }

    #[test]
    fn test_stuck_cabins_detects_overlong_collection() {
        let mut mgr = FsmManager::new(2, cfg());
        mgr.update_all(&[frame(0, 1000.0, 0.0)]);
        mgr.update_all(&[frame(0, 900.0, 0.1)]);
        assert_eq!(mgr.get(0).unwrap().state(), CabinState::Collecting);
        assert!(mgr.stuck_cabins(200.0, 120.0).contains(&0));
        assert!(!mgr.stuck_cabins(1.0, 120.0).contains(&0));
    }

    #[test]
    fn test_indices_in_state() {
        let mut mgr = FsmManager::new(2, cfg());
        mgr.update_all(&[frame(0, 1000.0, 0.0)]);
        mgr.update_all(&[frame(0, 900.0, 0.1)]);
        assert_eq!(mgr.indices_in_state(CabinState::Collecting), vec![0]);
        assert_eq!(mgr.indices_in_state(CabinState::Idle), vec![1]);
    }
}
