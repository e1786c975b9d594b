//! Type-state builder for `Diverter` and generic `build_diverter` constructor.
//!
//! The builder enforces at compile time that load outputs are provided before
//! `build()` is available. `try_build()` is always available for dynamic checks.

use std::marker::PhantomData;
use std::sync::Arc;

use diverter_traits::DigitalOutputs;

use crate::background::Background;
use crate::config::{BackgroundConfig, CoreConfig, RelayConfig};
use crate::core::DiverterCore;
use crate::error::{BuildError, Result};
use crate::relay::{PowerAverage, Relay, RelayEngine};
use crate::shared::SharedState;
use crate::util::sample_sets_per_cycle;
use crate::{MAX_LOADS, MAX_RELAYS};

/// Boxed output driver, movable into the sampling thread.
pub type BoxedOutputs = Box<dyn DigitalOutputs + Send>;

/// Both halves of an engine, wired to the same shared state.
pub struct Diverter<O: DigitalOutputs, R: DigitalOutputs> {
    pub core: DiverterCore<O>,
    pub background: Background<R>,
}

/// Dynamic (boxed) diverter as produced by [`DiverterBuilder`].
pub type BoxedDiverter = Diverter<BoxedOutputs, BoxedOutputs>;

impl<O: DigitalOutputs, R: DigitalOutputs> core::fmt::Debug for Diverter<O, R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Diverter")
            .field("core", &self.core)
            .field("background", &self.background)
            .finish()
    }
}

impl<O: DigitalOutputs, R: DigitalOutputs> Diverter<O, R> {
    pub fn into_parts(self) -> (DiverterCore<O>, Background<R>) {
        (self.core, self.background)
    }

    pub fn shared(&self) -> &Arc<SharedState> {
        self.core.shared()
    }
}

impl BoxedDiverter {
    /// Start building a Diverter.
    pub fn builder() -> DiverterBuilder<Missing> {
        DiverterBuilder::default()
    }
}

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

/// Builder for `Diverter`. All fields are validated on `build()`.
pub struct DiverterBuilder<L> {
    core: Option<CoreConfig>,
    relays: Option<RelayConfig>,
    background: Option<BackgroundConfig>,
    load_outputs: Option<BoxedOutputs>,
    relay_outputs: Option<BoxedOutputs>,
    shared: Option<Arc<SharedState>>,
    _l: PhantomData<L>,
}

impl Default for DiverterBuilder<Missing> {
    fn default() -> Self {
        Self {
            core: None,
            relays: None,
            background: None,
            load_outputs: None,
            relay_outputs: None,
            shared: None,
            _l: PhantomData,
        }
    }
}

impl<L> DiverterBuilder<L> {
    /// Take every section from a parsed configuration file.
    pub fn with_config(mut self, cfg: &diverter_config::Config) -> Self {
        self.core = Some(cfg.into());
        self.relays = Some(cfg.into());
        self.background = Some(cfg.into());
        self
    }

    pub fn with_core(mut self, cfg: CoreConfig) -> Self {
        self.core = Some(cfg);
        self
    }

    pub fn with_relays(mut self, cfg: RelayConfig) -> Self {
        self.relays = Some(cfg);
        self
    }

    pub fn with_background(mut self, cfg: BackgroundConfig) -> Self {
        self.background = Some(cfg);
        self
    }

    /// Outputs for the relay stage; required only when relays are configured.
    pub fn with_relay_outputs<R: DigitalOutputs + Send + 'static>(mut self, outputs: R) -> Self {
        self.relay_outputs = Some(Box::new(outputs));
        self
    }

    /// Share an existing state block instead of allocating one.
    pub fn with_shared(mut self, shared: Arc<SharedState>) -> Self {
        self.shared = Some(shared);
        self
    }

    pub fn with_load_outputs<O: DigitalOutputs + Send + 'static>(
        self,
        outputs: O,
    ) -> DiverterBuilder<Set> {
        DiverterBuilder {
            core: self.core,
            relays: self.relays,
            background: self.background,
            load_outputs: Some(Box::new(outputs)),
            relay_outputs: self.relay_outputs,
            shared: self.shared,
            _l: PhantomData,
        }
    }

    /// Build with runtime checks, whatever the type state.
    pub fn try_build(self) -> Result<BoxedDiverter> {
        let load_outputs = self
            .load_outputs
            .ok_or_else(|| eyre::Report::new(BuildError::MissingOutputs))?;
        let relays = self.relays.unwrap_or_default();
        let relay_outputs: BoxedOutputs = match self.relay_outputs {
            Some(r) => r,
            None if relays.relays.is_empty() => Box::new(crate::mocks::NullOutputs),
            None => return Err(eyre::Report::new(BuildError::MissingOutputs)),
        };
        let core = self.core.unwrap_or_default();
        let background = self.background.unwrap_or_else(|| BackgroundConfig {
            frequency_hz: core.frequency_hz,
            datalog_period_cycles: core.datalog_period_cycles,
            load_count: core.load_pins.len(),
            ..BackgroundConfig::default()
        });
        validate_and_build(
            core,
            relays,
            background,
            load_outputs,
            relay_outputs,
            self.shared.unwrap_or_default(),
        )
    }
}

impl DiverterBuilder<Set> {
    pub fn build(self) -> Result<BoxedDiverter> {
        self.try_build()
    }
}

fn invalid(reason: &'static str) -> eyre::Report {
    eyre::Report::new(BuildError::InvalidConfig(reason))
}

/// Validate configuration and construct both contexts.
///
/// This is the single source of truth for validation and construction,
/// used by both `DiverterBuilder::try_build()` and `build_diverter()`.
fn validate_and_build<O: DigitalOutputs, R: DigitalOutputs>(
    core: CoreConfig,
    relays: RelayConfig,
    background: BackgroundConfig,
    load_outputs: O,
    relay_outputs: R,
    shared: Arc<SharedState>,
) -> Result<Diverter<O, R>> {
    // ── Validation ───────────────────────────────────────────────────────────
    if core.frequency_hz == 0 {
        return Err(invalid("frequency must be > 0"));
    }
    if core.sample_set_period_us == 0 {
        return Err(invalid("sample set period must be > 0"));
    }
    if core.capacity_ieu <= 0 {
        return Err(invalid("bucket capacity must be > 0"));
    }
    if core.load_pins.is_empty() {
        return Err(invalid("at least one load is required"));
    }
    if core.load_pins.len() > MAX_LOADS {
        return Err(invalid("too many loads"));
    }
    if relays.relays.len() > MAX_RELAYS {
        return Err(invalid("too many relays"));
    }
    if core.datalog_period_cycles == 0 || relays.tick_s == 0 {
        return Err(invalid("datalog period must be > 0"));
    }
    if core.post_transition_cycles == 0 {
        return Err(invalid("post-transition lockout must be >= 1 cycle"));
    }
    let half = sample_sets_per_cycle(core.sample_set_period_us, core.frequency_hz) / 2;
    if core.arming_index >= half {
        return Err(invalid("arming index beyond the negative half-cycle"));
    }
    if u32::from(core.persistence) >= half {
        return Err(invalid("polarity persistence must be shorter than a half-cycle"));
    }
    if background.load_count != core.load_pins.len() {
        return Err(invalid("background load count does not match the load table"));
    }
    let mut pins: Vec<u8> = core.load_pins.clone();
    pins.extend(relays.relays.iter().map(|r| r.pin));
    pins.sort_unstable();
    if pins.windows(2).any(|w| w[0] == w[1]) {
        return Err(invalid("output pins must be distinct"));
    }

    // ── Construction ─────────────────────────────────────────────────────────
    let average = PowerAverage::for_window(relays.window_minutes, relays.tick_s);
    let table: Vec<Relay> = relays
        .relays
        .iter()
        .map(|r| Relay::new(r.pin, r.surplus_w, r.import_w, r.min_on_s, r.min_off_s))
        .collect();
    if !table.is_empty() {
        tracing::debug!(
            requested_min = relays.window_minutes,
            achieved_ticks = average.window_ticks(),
            tick_s = relays.tick_s,
            "relay averaging window"
        );
    }

    tracing::debug!(
        capacity = core.capacity_ieu,
        loads = core.load_pins.len(),
        relays = table.len(),
        "diverter built"
    );

    Ok(Diverter {
        core: DiverterCore::new(core, load_outputs, Arc::clone(&shared)),
        background: Background::new(
            background,
            shared,
            RelayEngine::new(&table, average),
            relay_outputs,
        ),
    })
}

/// Construct a diverter with static dispatch.
pub fn build_diverter<O: DigitalOutputs, R: DigitalOutputs>(
    cfg: &diverter_config::Config,
    load_outputs: O,
    relay_outputs: R,
) -> Result<Diverter<O, R>> {
    validate_and_build(
        cfg.into(),
        cfg.into(),
        cfg.into(),
        load_outputs,
        relay_outputs,
        Arc::new(SharedState::new()),
    )
}
