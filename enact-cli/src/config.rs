//! CLI 配置
//!
//! 日志配置：全局级别加按阶段覆盖

use enact_config::Phase;
use tracing::Level;

/// CLI 日志配置
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub global: Level,
    /// 按阶段覆盖的级别
    pub phases: Vec<(Phase, Level)>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            global: Level::WARN,
            phases: Vec::new(),
        }
    }
}

impl LogConfig {
    /// Override the level of one phase (last override wins)
    pub fn set(&mut self, phase: Phase, level: Level) {
        self.phases.retain(|(p, _)| *p != phase);
        self.phases.push((phase, level));
    }

    /// Get log level for a specific phase
    pub fn level_for(&self, phase: Phase) -> Level {
        self.phases
            .iter()
            .find(|(p, _)| *p == phase)
            .map_or(self.global, |(_, level)| *level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_override() {
        let mut config = LogConfig::default();
        assert_eq!(config.level_for(Phase::Vm), Level::WARN);

        config.set(Phase::Vm, Level::TRACE);
        config.set(Phase::Vm, Level::DEBUG);
        assert_eq!(config.level_for(Phase::Vm), Level::DEBUG);
        assert_eq!(config.level_for(Phase::Gc), Level::WARN);
        assert_eq!(config.phases.len(), 1);
    }
}
