/// Assembles a prompt template in the shape the batch runner expects.
///
/// Input fields are listed in the order they were added, which must match
/// the column order of the data sent later.
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    role: String,
    input_fields: Vec<(String, String)>,
    problem: String,
    output_fields: Vec<(String, String)>,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn input_field(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.input_fields.push((name.into(), description.into()));
        self
    }

    pub fn problem(mut self, problem: impl Into<String>) -> Self {
        self.problem = problem.into();
        self
    }

    /// Add a requested output field. Entries with an empty name or
    /// description are skipped when the prompt is built.
    pub fn output_field(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.output_fields.push((name.into(), description.into()));
        self
    }

    pub fn build(&self) -> String {
        let outputs: Vec<(&str, &str)> = self
            .output_fields
            .iter()
            .map(|(n, d)| (n.trim(), d.trim()))
            .filter(|(n, d)| !n.is_empty() && !d.is_empty())
            .collect();

        let mut prompt = format!("You will act as a {}\n", self.role);
        prompt.push_str(&format!(
            "I will provide a row of tab-delimited data containing {} elements, with the following field names and descriptions:\n",
            self.input_fields.len()
        ));
        for (name, description) in &self.input_fields {
            prompt.push_str(&format!("{}: {}\n", name, description));
        }

        prompt.push_str(&format!(
            "The problem I would like you to address is:\n{}\n",
            self.problem.trim()
        ));
        prompt.push_str("Analyze these data and report the following items in JSON format. Do not add any additional text or commentary:\n");

        let names: Vec<&str> = outputs.iter().map(|(n, _)| *n).collect();
        prompt.push_str(&format!("Output_Fields will be [{}]\n", names.join(", ")));
        for (name, description) in &outputs {
            prompt.push_str(&format!("{}: {}\n", name, description));
        }

        prompt.push_str("Here are the data:\n");
        prompt
    }
}

/// Build the user message for one serialized row
pub fn build_user_message(serialized_row: &str) -> String {
    format!(" {} .", serialized_row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::parse_output_fields;

    fn sample() -> PromptBuilder {
        PromptBuilder::new()
            .role("pathologist")
            .input_field("PatientID", "an identifier")
            .input_field("Report", "free-text pathology report")
            .problem("Extract the tumour grade and stage.\n")
            .output_field("Grade", "histological grade 1-3")
            .output_field("Stage", "TNM stage in roman numerals")
    }

    #[test]
    fn test_build_layout() {
        let prompt = sample().build();
        let lines: Vec<&str> = prompt.lines().collect();

        assert_eq!(lines[0], "You will act as a pathologist");
        assert!(lines[1].contains("containing 2 elements"));
        assert_eq!(lines[2], "PatientID: an identifier");
        assert_eq!(lines[3], "Report: free-text pathology report");
        assert_eq!(lines[4], "The problem I would like you to address is:");
        assert_eq!(lines[5], "Extract the tumour grade and stage.");
        assert_eq!(lines[7], "Output_Fields will be [Grade, Stage]");
        assert_eq!(lines[8], "Grade: histological grade 1-3");
        assert_eq!(lines.last(), Some(&"Here are the data:"));
    }

    #[test]
    fn test_built_prompt_parses_back() {
        let prompt = sample().build();
        assert_eq!(parse_output_fields(&prompt).unwrap(), vec!["Grade", "Stage"]);
    }

    #[test]
    fn test_incomplete_output_fields_dropped() {
        let prompt = PromptBuilder::new()
            .role("analyst")
            .output_field("Score", "0-10")
            .output_field("Unused", "  ")
            .output_field("", "no name")
            .build();
        assert!(prompt.contains("Output_Fields will be [Score]\n"));
        assert!(!prompt.contains("Unused"));
    }

    #[test]
    fn test_user_message_wraps_row() {
        assert_eq!(build_user_message("a\tb"), " a\tb .");
    }
}
