use anyhow::{Context, Result, bail};
use flow_store::{FlowDocument, validate_document};
use std::{fs, path::Path};
use tracing::info;

use crate::{
    bridge::BridgePorts,
    reconcile::reconcile,
    wiring::{wire_input, wire_output},
};

fn read_flow_file(flow_file: &Path) -> Result<FlowDocument> {
    if !flow_file.exists() {
        bail!("File does not exist: {}", flow_file.display());
    }
    let content = fs::read_to_string(flow_file)
        .with_context(|| format!("Failed to read file: {}", flow_file.display()))?;
    FlowDocument::from_json(&content)
        .with_context(|| format!("Invalid JSON in file: {}", flow_file.display()))
}

/// Validate that the provided file holds a deployable flow document.
pub fn validate_flow_file(flow_file: &Path) -> Result<FlowDocument> {
    let doc = read_flow_file(flow_file)?;
    validate_document(&doc)
        .with_context(|| format!("Validation failed: {}", flow_file.display()))?;
    info!("✅ Valid flow document: {} ({} nodes)", flow_file.display(), doc.len());
    Ok(doc)
}

/// Run reconciliation and both wiring steps over a flow file offline.
///
/// Returns the resulting document and whether it differs from the file. With
/// `write` set, a changed document replaces the file.
pub fn reconcile_flow_file(
    flow_file: &Path,
    ports: BridgePorts,
    write: bool,
) -> Result<(FlowDocument, bool)> {
    let doc = read_flow_file(flow_file)?;
    let (mut doc, mut changed) = reconcile(doc, ports);
    changed |= wire_input(&mut doc);
    changed |= wire_output(&mut doc);

    if changed && write {
        validate_document(&doc).context("reconciled document does not validate")?;
        fs::write(flow_file, doc.to_json_pretty()?)
            .with_context(|| format!("Failed to write file: {}", flow_file.display()))?;
        info!("updated {}", flow_file.display());
    }
    Ok((doc, changed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn validate_rejects_missing_file() {
        assert!(validate_flow_file(Path::new("/nonexistent/flows.json")).is_err());
    }

    #[test]
    fn reconcile_writes_only_when_asked() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("flows.json");
        fs::write(&path, r#"[{"id":"t1","type":"tab","label":"Flow 1"}]"#).unwrap();

        let (doc, changed) = reconcile_flow_file(&path, BridgePorts::new(9091, 9092), false).unwrap();
        assert!(changed);
        assert_eq!(doc.len(), 5);
        assert_eq!(validate_flow_file(&path).unwrap().len(), 1);

        reconcile_flow_file(&path, BridgePorts::new(9091, 9092), true).unwrap();
        assert_eq!(validate_flow_file(&path).unwrap().len(), 5);

        let (_, changed) = reconcile_flow_file(&path, BridgePorts::new(9091, 9092), true).unwrap();
        assert!(!changed);
    }
}
