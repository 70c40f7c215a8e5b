//! Emission-time configuration.

/// Recognised configuration options (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EmitConfig {
    /// Enables trace emission at the `const`, `fixup`, and `emit`
    /// boundaries. `0` disables tracing output entirely.
    pub debug_level: u8,
    /// When `0`, the debug segment is produced and exported with the
    /// artifact; otherwise it is built internally but omitted from export.
    pub optimizer_level: u8,
    /// Treats second-and-later sub entries as zero-length (raw-assembly
    /// mode, where a sub's start and end offsets coincide).
    pub pasm_file: bool,
}

impl Default for EmitConfig {
    fn default() -> Self {
        Self {
            debug_level: 0,
            optimizer_level: 1,
            pasm_file: false,
        }
    }
}

impl EmitConfig {
    /// `true` if the debug segment should be included in the exported
    /// artifact.
    pub const fn emits_debug_segment(&self) -> bool {
        self.optimizer_level == 0
    }

    /// `true` if tracing events should be emitted at all.
    pub const fn traces(&self) -> bool {
        self.debug_level > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_traces_nothing_and_omits_debug_segment() {
        let config = EmitConfig::default();
        assert!(!config.traces());
        assert!(!config.emits_debug_segment());
    }

    #[test]
    fn nonzero_optimizer_level_omits_debug_segment() {
        let config = EmitConfig {
            optimizer_level: 2,
            ..EmitConfig::default()
        };
        assert!(!config.emits_debug_segment());
    }
}
