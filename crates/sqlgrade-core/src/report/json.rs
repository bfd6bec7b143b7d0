use crate::model::SubmissionResult;
use std::path::Path;

pub fn to_json(result: &SubmissionResult) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(result)?)
}

pub fn write_json(result: &SubmissionResult, out: &Path) -> anyhow::Result<()> {
    std::fs::write(out, to_json(result)?)?;
    Ok(())
}
