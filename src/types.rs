use serde::{Deserialize, Serialize};

/// Probability above which a text is reported as toxic.
pub const TOXIC_THRESHOLD: f64 = 0.5;

pub const NO_TEXT_MESSAGE: &str = "No text provided";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub text: Option<String>,
}

/// Softmax output of the two-class head, in model index order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToxicityScores {
    #[serde(rename = "non-toxic")]
    pub non_toxic: f64,
    pub toxic: f64,
}

impl ToxicityScores {
    pub fn is_toxic(&self) -> bool {
        self.toxic > TOXIC_THRESHOLD
    }
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub input: String,
    pub result: ToxicityScores,
    pub toxic: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
