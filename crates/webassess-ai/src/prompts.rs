use crate::analyzer::PromptStrategy;

/// Fields every HTML analysis answer carries.
pub const ANALYSIS_FIELDS: [&str; 5] = [
    "codeSummary",
    "potentialVulnerabilities",
    "vulnerabilitiesSummary",
    "potentialSensitiveData",
    "sensitiveDataSummary",
];

const ANALYSIS_SCHEMA: &str = r#"{
  "codeSummary": "A brief summary of the HTML code's functionality and purpose",
  "potentialVulnerabilities": true/false,
  "vulnerabilitiesSummary": "A summary of potential vulnerabilities, if any",
  "potentialSensitiveData": true/false,
  "sensitiveDataSummary": "A summary of potential sensitive data exposed, if any"
}"#;

/// Security review of an HTML document, answered as a fixed JSON object.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlAnalysisPrompts;

impl PromptStrategy for HtmlAnalysisPrompts {
    fn leaf_prompt(&self, segment: &str) -> String {
        format!(
            "Task: Analyze the following HTML code and answer in JSON using the schema below.\n\
             \n\
             Instructions:\n\
             1. Summarize what the HTML code does and what it is for.\n\
             2. Look for potential vulnerabilities.\n\
             3. Look for sensitive data exposed in the code.\n\
             4. Answer with a JSON object of this shape:\n\
             \n\
             {schema}\n\
             \n\
             Notes:\n\
             - 'codeSummary' is required.\n\
             - 'potentialVulnerabilities' and 'potentialSensitiveData' are required booleans.\n\
             - When 'potentialVulnerabilities' is true, 'vulnerabilitiesSummary' must not be null.\n\
             - When 'potentialSensitiveData' is true, 'sensitiveDataSummary' must not be null.\n\
             - When nothing is found, set the boolean to false and leave out its summary.\n\
             - Output only the JSON object.\n\
             \n\
             HTML code:\n\
             ```html\n\
             {segment}\n\
             ```\n\
             \n\
             JSON analysis:",
            schema = ANALYSIS_SCHEMA,
            segment = segment,
        )
    }

    fn merge_prompt(&self, combined: &str) -> String {
        format!(
            "Task: Merge the two JSON analyses below, each covering part of one HTML document, \
             into a single analysis of the whole document.\n\
             \n\
             Instructions:\n\
             1. Combine both analyses and resolve any conflicts between them.\n\
             2. Keep every finding; prefer the more detailed wording.\n\
             3. Answer with one JSON object using the same fields:\n\
             \x20  - codeSummary: summary of the whole document's functionality and purpose\n\
             \x20  - potentialVulnerabilities: true if either analysis found a vulnerability\n\
             \x20  - vulnerabilitiesSummary: all potential vulnerabilities found (omit if none)\n\
             \x20  - potentialSensitiveData: true if either analysis found sensitive data\n\
             \x20  - sensitiveDataSummary: all potential sensitive data found (omit if none)\n\
             \n\
             Analyses to merge:\n\
             {combined}\n\
             \n\
             Merged JSON analysis:",
            combined = combined,
        )
    }
}
