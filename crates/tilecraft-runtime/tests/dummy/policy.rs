use tilecraft_ir::{HardwareProfile, OperatorGraph};
use tilecraft_runtime::tune::{ConfigPolicy, Configuration, DefaultPolicy, TuneError};

/// Emits a fixed list of configurations, in order.
#[derive(Debug, Clone)]
pub struct FixedPolicy(pub Vec<Configuration>);

impl ConfigPolicy for FixedPolicy {
    fn emit_config(
        &self,
        _graph: &OperatorGraph,
        _hardware: &HardwareProfile,
        count: usize,
    ) -> Result<Vec<Configuration>, TuneError> {
        Ok(self.0.iter().take(count).copied().collect())
    }

    fn emit_config_around(
        &self,
        _graph: &OperatorGraph,
        _hardware: &HardwareProfile,
        _seeds: &[Configuration],
        _count: usize,
    ) -> Result<Vec<Configuration>, TuneError> {
        Ok(Vec::new())
    }

    fn validate(
        &self,
        graph: &OperatorGraph,
        hardware: &HardwareProfile,
        config: &Configuration,
    ) -> Result<(), String> {
        DefaultPolicy::default().validate(graph, hardware, config)
    }
}
