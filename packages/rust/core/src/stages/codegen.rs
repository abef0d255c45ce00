use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use extractflow_agents::CodeGenerator;
use extractflow_shared::{OutputBag, OutputKey, Result, StageId};

use crate::stage::{Stage, StageContext, input};

/// Generated extractor source inside the slot.
pub const EXTRACTION_CODE_FILE: &str = "extraction_code.py";

/// Writes the extractor for the schema.
pub struct CodeGenerationStage {
    generator: Arc<dyn CodeGenerator>,
}

impl CodeGenerationStage {
    pub fn new(generator: Arc<dyn CodeGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl Stage for CodeGenerationStage {
    fn id(&self) -> StageId {
        StageId::CodeGenerated
    }

    fn required_inputs(&self) -> &'static [OutputKey] {
        &[OutputKey::Schema]
    }

    fn produced_outputs(&self) -> &'static [OutputKey] {
        &[OutputKey::ExtractionCode]
    }

    #[instrument(skip_all, fields(slot = ctx.slot_id))]
    async fn run(&self, ctx: &StageContext<'_>, inputs: &OutputBag) -> Result<OutputBag> {
        let schema = input(&inputs.schema, self.id(), OutputKey::Schema)?;

        let code = match self.generator.generate_code(schema).await {
            Ok(code) => code,
            Err(e) => {
                if ctx.store.remove(EXTRACTION_CODE_FILE) {
                    warn!("removed extractor source left by an earlier attempt");
                }
                return Err(e);
            }
        };

        let meta = ctx.store.write_text(EXTRACTION_CODE_FILE, &code)?;
        info!(
            file = %meta.filename,
            lines = code.lines().count(),
            "extractor source saved"
        );

        Ok(OutputBag {
            extraction_code: Some(code),
            ..OutputBag::default()
        })
    }
}
