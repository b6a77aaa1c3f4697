//! Pluggable fourth processor (spec §4.D.5): the core only routes `Custom`
//! rules to whatever implementation the host application registers.

use async_trait::async_trait;
use security_common::model::{LogEvent, Rule, RuleMatch};

#[async_trait]
pub trait CustomRuleProcessor: Send + Sync {
    async fn process(
        &self,
        rule: &Rule,
        events: &[LogEvent],
        raw_content: &str,
    ) -> Result<Option<RuleMatch>, crate::error::RuleEngineError>;
}
