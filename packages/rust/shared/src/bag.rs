//! The cumulative output bag carried between stages and stored in checkpoints.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::payloads::{
    ContentAnalysis, ConversionSummary, Decoded, DocumentAnalysis, ExtractionSchema,
    ExtractionSummary, Synthesis, ValidationReport, VisualAnalysis,
};

/// Declares [`OutputKey`] and [`OutputBag`] from one field list so the two
/// can never drift apart.
macro_rules! output_bag {
    ($( $(#[$doc:meta])* $field:ident : $ty:ty => $variant:ident ),+ $(,)?) => {
        /// Name of one artifact in the output bag.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum OutputKey {
            $( $variant ),+
        }

        impl OutputKey {
            pub const ALL: &'static [OutputKey] = &[ $( OutputKey::$variant ),+ ];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $( OutputKey::$variant => stringify!($field) ),+
                }
            }
        }

        /// Append-only set of named stage artifacts.
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        pub struct OutputBag {
            $(
                $(#[$doc])*
                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub $field: Option<$ty>,
            )+
        }

        impl OutputBag {
            /// Whether the artifact named `key` is present.
            pub fn contains(&self, key: OutputKey) -> bool {
                match key {
                    $( OutputKey::$variant => self.$field.is_some() ),+
                }
            }

            /// JSON form of one artifact, used when persisting step results.
            pub fn value(&self, key: OutputKey) -> Option<Value> {
                match key {
                    $( OutputKey::$variant => self
                        .$field
                        .as_ref()
                        .and_then(|v| serde_json::to_value(v).ok()) ),+
                }
            }

            fn copy_from(&mut self, other: &OutputBag, key: OutputKey) {
                match key {
                    $( OutputKey::$variant => self.$field = other.$field.clone() ),+
                }
            }
        }
    };
}

output_bag! {
    /// Ordered identifiers of the run's input documents.
    file_identifiers: Vec<String> => FileIdentifiers,
    analysis_results: Vec<DocumentAnalysis> => AnalysisResults,
    /// Empty when visual analysis was disabled or failed.
    visual_results: Vec<VisualAnalysis> => VisualResults,
    synthesized: Decoded<Synthesis> => Synthesized,
    schema: Decoded<ExtractionSchema> => Schema,
    /// Generated extractor source.
    extraction_code: String => ExtractionCode,
    validation: ValidationReport => Validation,
    /// Extractor source after validation and fixes.
    validated_code: String => ValidatedCode,
    extraction: ExtractionSummary => Extraction,
    content_analysis: Decoded<ContentAnalysis> => ContentAnalysis,
    /// Generated converter source.
    markdown_converter_code: String => MarkdownConverterCode,
    conversion: ConversionSummary => Conversion,
}

impl std::fmt::Display for OutputKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl OutputBag {
    /// Keys currently present, in declaration order.
    pub fn keys(&self) -> Vec<OutputKey> {
        OutputKey::ALL
            .iter()
            .copied()
            .filter(|k| self.contains(*k))
            .collect()
    }

    pub fn contains_all(&self, keys: &[OutputKey]) -> bool {
        keys.iter().all(|k| self.contains(*k))
    }

    /// Keys from `keys` that are absent.
    pub fn missing(&self, keys: &[OutputKey]) -> Vec<OutputKey> {
        keys.iter().copied().filter(|k| !self.contains(*k)).collect()
    }

    /// A bag holding only the listed artifacts.
    pub fn project(&self, keys: &[OutputKey]) -> OutputBag {
        let mut projected = OutputBag::default();
        for key in keys {
            projected.copy_from(self, *key);
        }
        projected
    }

    /// Take the listed artifacts from `other`, replacing current values.
    ///
    /// Keys absent from `other` are left untouched.
    pub fn merge(&mut self, other: &OutputBag, keys: &[OutputKey]) {
        for key in keys {
            if other.contains(*key) {
                self.copy_from(other, *key);
            }
        }
    }

    /// Take every artifact from `other` that this bag does not have yet.
    pub fn fill_missing(&mut self, other: &OutputBag) {
        for key in OutputKey::ALL {
            if !self.contains(*key) && other.contains(*key) {
                self.copy_from(other, *key);
            }
        }
    }
}
