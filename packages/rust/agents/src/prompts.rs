//! Prompt text for every collaborator call.
//!
//! The interface sections of the code generation prompts mirror the
//! contracts in `extractflow-plugin`; keep them in sync.

use extractflow_plugin::{CONVERTER_CONTRACT, EXTRACTOR_CONTRACT};

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

pub fn document_analysis(file: &str, html: &str) -> String {
    format!(
        r#"Analyze the structure of the following HTML document and identify its key content sections.

File: {file}

HTML:
{html}

Identify:
1. The main content sections (title, body, comments, metadata, and so on)
2. An XPath expression locating each section
3. Patterns shared by repeated elements, such as every comment item
4. Structural traits that distinguish each section

Answer with JSON only, in this shape:
{{
    "file": "{file}",
    "sections": [
        {{
            "name": "article_title",
            "type": "title|body|comment|metadata|other",
            "xpath": "//h1[@class='title']",
            "description": "what the section holds",
            "is_list": false,
            "list_xpath": "xpath of the list items, when is_list is true",
            "attributes": {{"class": "...", "id": "..."}},
            "content_sample": "a short excerpt"
        }}
    ],
    "patterns": {{
        "common_classes": [],
        "common_ids": [],
        "structural_patterns": []
    }},
    "notes": "anything else worth knowing"
}}"#
    )
}

pub fn visual_analysis(file: &str) -> String {
    format!(
        r#"The image is a rendering of an HTML page. Describe its visual structure and content sections.

File: {file}

Identify the main areas (header, body, sidebar, footer, comments), the visual cues that
mark each content type, the overall layout, and any repeating blocks such as comment items.

Answer with JSON only, in this shape:
{{
    "file": "{file}",
    "visual_sections": [
        {{
            "name": "section_name",
            "type": "header|body|comment|sidebar|footer|other",
            "description": "how it looks",
            "position": "top|middle|bottom|left|right",
            "characteristics": [],
            "likely_xpath_hints": []
        }}
    ],
    "layout_structure": "overall layout",
    "repeating_patterns": [],
    "notes": ""
}}"#
    )
}

// ---------------------------------------------------------------------------
// Synthesis and schema
// ---------------------------------------------------------------------------

pub const SYNTHESIS_SYSTEM: &str = "You combine structural analyses of several HTML documents \
produced by other agents. Find what the documents have in common and settle on one \
unified description of their structure.";

pub fn synthesis(files: &[String], analyses_json: &str) -> String {
    format!(
        r#"Structural analyses of {count} HTML documents follow.

Documents: {files}

Analyses:
{analyses_json}

Combine them and identify:
1. Structural patterns shared by all documents
2. The key content sections (title, body, comments, ...)
3. XPath expressions that work across documents
4. Inconsistencies and edge cases between documents

Answer with JSON only, in this shape:
{{
    "common_patterns": [],
    "content_sections": [],
    "xpath_patterns": [],
    "inconsistencies": []
}}"#,
        count = files.len(),
        files = files.join(", "),
    )
}

pub const SCHEMA_SYSTEM: &str = "You write extraction schemas for HTML documents. A schema \
names every content section, gives XPath expressions that locate it, says whether it \
repeats, and records notes about the structure. Output must be valid JSON.";

pub fn schema(synthesis_json: &str) -> String {
    format!(
        r#"Write an extraction schema from this structural synthesis:

{synthesis_json}

Use this shape:
{{
    "schema_version": "1.0",
    "description": "what the schema extracts",
    "sections": [
        {{
            "name": "section_name",
            "description": "what the section holds",
            "xpath": "primary xpath",
            "xpath_list": ["fallback xpath", "..."],
            "is_list": false,
            "attributes": {{}},
            "notes": ""
        }}
    ],
    "metadata": {{
        "total_sections": 0,
        "extraction_notes": ""
    }}
}}

Every XPath expression must be valid and select the intended content."#
    )
}

// ---------------------------------------------------------------------------
// Extractor code
// ---------------------------------------------------------------------------

pub const CODEGEN_SYSTEM: &str = "You write Python code that extracts content from HTML. The \
generated code must implement the requested interface exactly: no renamed methods, no \
renamed parameters, no custom result types. It must handle missing elements and malformed \
input without raising.";

/// The extractor interface, shared by generation and review prompts.
fn extractor_interface() -> String {
    let c = &EXTRACTOR_CONTRACT;
    format!(
        r#"REQUIRED INTERFACE
- A class named exactly `{class}`.
- Constructor: `def __init__(self, {ctor}: Dict[str, Any], logger: Optional[logging.Logger] = None) -> None`.
  The parameter must be named `{ctor}`.
- Method: `def {method}(self, html_content: Optional[str] = None, file_path: Optional[str] = None) -> {returns}`.
  Parameter names must be exactly `{p0}` and `{p1}`; the return annotation must be `-> {returns}`.
- `{method}` returns a plain dict keyed by section name. Values are a string, a list of
  strings, or None. Missing single values are None, missing lists are [].
- When `html_content` is given, parse it directly; otherwise read `file_path`.
- Do not add alternative entry points (extract_from_string, extract_content, ...), wrapper
  functions, dataclasses, or result objects."#,
        class = c.class_name,
        ctor = c.constructor_args[0],
        method = c.method,
        p0 = c.method_params[0],
        p1 = c.method_params[1],
        returns = c.returns,
    )
}

pub fn extractor_code(schema_json: &str, section_count: usize) -> String {
    format!(
        r#"Write Python code that extracts content from HTML files according to this schema:

{schema_json}

{interface}

IMPLEMENTATION
- Parse with lxml (`from lxml import html, etree`); BeautifulSoup is acceptable.
- Try each section's `xpath`, then its `xpath_list` entries, until one matches.
- Wrap parsing, file reading and each XPath evaluation in try/except.
- Use Python literals (True/False/None), never JSON literals.
- Use pathlib for paths and never hard-code file locations.
- Extract all {section_count} sections of the schema.

SKELETON
```python
import logging
from typing import Any, Dict, Optional

from lxml import html


class HTMLExtractor:
    def __init__(self, schema: Dict[str, Any], logger: Optional[logging.Logger] = None) -> None:
        self.schema = schema
        self.sections = schema.get("sections", [])
        self.logger = logger or logging.getLogger(__name__)

    def extract(self, html_content: Optional[str] = None, file_path: Optional[str] = None) -> Dict[str, Any]:
        result: Dict[str, Any] = {{}}
        ...
        return result
```

Return the complete module in one ```python code block."#,
        interface = extractor_interface(),
    )
}

// ---------------------------------------------------------------------------
// Review
// ---------------------------------------------------------------------------

pub const REVIEW_SYSTEM: &str = "You review generated Python extraction code. Fix every \
reported problem while keeping the required interface intact, and return the whole \
corrected module.";

pub fn code_review(code: &str, findings: &[String], schema_excerpt: &str) -> String {
    let findings = if findings.is_empty() {
        "No blocking findings.".to_string()
    } else {
        findings
            .iter()
            .map(|f| format!("- {f}"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let schema_context = if schema_excerpt.is_empty() {
        String::new()
    } else {
        format!("\nSchema (excerpt):\n{schema_excerpt}\n")
    };

    format!(
        r#"Review and fix this HTML extraction module.

Findings:
{findings}

Code:
```python
{code}
```
{schema_context}
Fix syntax errors, add the missing error handling and None checks, correct interface
problems, replace JSON literals with Python ones, and use pathlib or raw strings for paths.

{interface}

Return the corrected module in one ```python code block, followed by a short bullet list
of the changes."#,
        interface = extractor_interface(),
    )
}

// ---------------------------------------------------------------------------
// Markdown conversion
// ---------------------------------------------------------------------------

pub const CONVERTER_SYSTEM: &str = "You analyze JSON extraction results to find where the \
main content lives and write Python code that renders such results as well-formed \
Markdown.";

pub fn content_analysis(samples_json: &str) -> String {
    format!(
        r#"These are JSON results extracted from HTML pages:

{samples_json}

Identify which fields hold the main body text, which hold metadata (title, date, author),
which are structural (navigation, headers), and how the fields relate.

Answer with JSON only, in this shape:
{{
    "main_content_fields": [],
    "metadata_fields": [],
    "structural_fields": [],
    "content_hierarchy": {{
        "primary": "field_name",
        "secondary": [],
        "metadata": []
    }},
    "field_types": {{"field_name": "html|text|list|object"}},
    "recommendations": "how to render these results as Markdown"
}}"#
    )
}

pub fn converter_code(analysis_json: &str, sample_json: &str, strict: bool) -> String {
    let c = &CONVERTER_CONTRACT;
    let mut prompt = format!(
        r#"Write Python code that converts one JSON extraction result into Markdown.

Content analysis:
{analysis_json}

Sample result:
{sample_json}

REQUIRED INTERFACE
- A class named exactly `{class}` whose constructor takes no arguments besides self.
- Method: `def {method}(self, {param}: Dict[str, Any]) -> {returns}`. The parameter must be
  named `{param}` and the return annotation must be `-> {returns}`.
- `{method}` returns the Markdown document as a plain string.
- Do not add alternative entry points (convert_to_markdown, convert_json, ...) or wrappers.

IMPLEMENTATION
- Put metadata first, then the primary content, then secondary content.
- Convert embedded HTML: headings to #, paragraphs to blank-line separated text, strong/b to
  **bold**, em/i to *italic*, links to [text](url), lists to - or 1., code to backticks,
  blockquotes to >, images to ![alt](src); strip every other tag but keep its text.
- Render lists as Markdown lists and nested objects sensibly.
- Guard every conversion step with try/except so one bad field cannot break the document.

SKELETON
```python
from typing import Any, Dict


class MarkdownConverter:
    def __init__(self) -> None:
        pass

    def convert(self, json_data: Dict[str, Any]) -> str:
        parts = []
        ...
        return "\n\n".join(parts)
```

Return the complete module in one ```python code block. It must compile."#,
        class = c.class_name,
        method = c.method,
        param = c.method_params[0],
        returns = c.returns,
    );

    if strict {
        prompt.push_str(
            r#"

THE PREVIOUS ATTEMPT DID NOT COMPILE.
- Close every string literal and f-string on the line where it opens.
- Use triple-quoted strings for any text spanning lines.
- Prefer str.join or str.format over complex f-strings.
- Check bracket and quote balance before answering."#,
        );
    }
    prompt
}
