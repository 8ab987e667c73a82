use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;

use crate::tools::{Tool, ToolArgs, ToolContent, ToolContext, ToolError, ToolOutput};

fn default_sides() -> u32 {
    6
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RollDiceArgs {
    /// Number of faces on the die
    #[serde(default = "default_sides")]
    pub sides: u32,
}

impl ToolArgs for RollDiceArgs {
    fn validate(&self) -> Result<(), String> {
        if self.sides < 1 {
            return Err("sides must be at least 1".to_string());
        }
        Ok(())
    }
}

pub struct RollDice;

#[async_trait]
impl Tool for RollDice {
    type Args = RollDiceArgs;

    fn name(&self) -> &'static str {
        "roll_dice"
    }

    fn description(&self) -> &'static str {
        "Roll a die and return the result"
    }

    async fn execute(&self, args: RollDiceArgs, _ctx: ToolContext) -> Result<ToolOutput, ToolError> {
        let value = fastrand::u32(1..=args.sides);
        Ok(ToolOutput::Single(ToolContent::text(value.to_string())))
    }
}
