use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use extractflow_agents::SchemaGenerator;
use extractflow_shared::{OutputBag, OutputKey, Result, StageId};

use crate::stage::{Stage, StageContext, input};

/// Schema file written next to the checkpoint for inspection and reuse.
pub const EXTRACTION_SCHEMA_FILE: &str = "extraction_schema.json";

/// Turns the synthesis into an extraction schema.
pub struct SchemaStage {
    generator: Arc<dyn SchemaGenerator>,
}

impl SchemaStage {
    pub fn new(generator: Arc<dyn SchemaGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl Stage for SchemaStage {
    fn id(&self) -> StageId {
        StageId::Schema
    }

    fn required_inputs(&self) -> &'static [OutputKey] {
        &[OutputKey::Synthesized]
    }

    fn produced_outputs(&self) -> &'static [OutputKey] {
        &[OutputKey::Schema]
    }

    #[instrument(skip_all, fields(slot = ctx.slot_id))]
    async fn run(&self, ctx: &StageContext<'_>, inputs: &OutputBag) -> Result<OutputBag> {
        let synthesized = input(&inputs.synthesized, self.id(), OutputKey::Synthesized)?;
        let schema = self.generator.generate_schema(synthesized).await?;

        if schema.is_raw() {
            warn!("schema response was not valid JSON, keeping it verbatim");
        }
        match ctx.store.save_json(EXTRACTION_SCHEMA_FILE, &schema) {
            Some(meta) => info!(file = %meta.filename, sha256 = %meta.sha256, "schema saved"),
            None => warn!("schema file could not be written"),
        }

        Ok(OutputBag {
            schema: Some(schema),
            ..OutputBag::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::Run;
    use crate::testing::{ScriptedLlm, documents, temp_root};
    use extractflow_artifacts::{ArtifactStore, StepValue};
    use extractflow_shared::Decoded;

    #[tokio::test]
    async fn schema_is_written_to_the_slot() {
        let root = temp_root("stage-schema");
        let stage = SchemaStage::new(Arc::new(ScriptedLlm::default()));
        let run = Run::new(documents(&["a.html"]), &root);
        let store = ArtifactStore::new(root.join("flow4"));
        let ctx = StageContext {
            run: &run,
            slot_id: 4,
            store: store.clone(),
        };
        let inputs = OutputBag {
            synthesized: Some(Decoded::raw("one article layout")),
            ..OutputBag::default()
        };

        let outputs = stage.run(&ctx, &inputs).await.unwrap();
        assert_eq!(
            outputs.schema.unwrap().structured().unwrap().sections[0].name,
            "title"
        );
        match store.load_step_result(EXTRACTION_SCHEMA_FILE, Some(EXTRACTION_SCHEMA_FILE)) {
            Some(StepValue::Json(value)) => assert_eq!(value["sections"][0]["xpath"], "//h1"),
            other => panic!("unexpected schema file: {other:?}"),
        }

        let _ = std::fs::remove_dir_all(&root);
    }
}
