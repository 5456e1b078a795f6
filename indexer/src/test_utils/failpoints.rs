use fail::FailScenario;

/// Configures failpoints for the lifetime of a test and turns them off on drop.
///
/// Holds the global [`FailScenario`] lock, so scenarios of concurrent tests run one at a time.
pub struct IndexerFailScenario<'a> {
    _scenario: FailScenario<'a>,
    failpoints: Vec<String>,
}

impl<'a> IndexerFailScenario<'a> {
    /// Applies `(failpoint, action)` pairs, for example `("checkpoint.before_advance", "return")`.
    pub fn setup(failpoints: &[(&str, &str)]) -> IndexerFailScenario<'a> {
        let scenario = FailScenario::setup();

        for (failpoint, action) in failpoints {
            if let Err(err) = fail::cfg(*failpoint, action) {
                panic!("invalid failpoint action for {failpoint}: {err}");
            }
        }

        Self {
            _scenario: scenario,
            failpoints: failpoints.iter().map(|(name, _)| name.to_string()).collect(),
        }
    }
}

impl Drop for IndexerFailScenario<'_> {
    fn drop(&mut self) {
        for failpoint in &self.failpoints {
            let _ = fail::cfg(failpoint.as_str(), "off");
        }
    }
}
