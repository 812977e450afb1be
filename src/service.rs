use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info};

use crate::gemini::{FormulationModel, GenerationError};
use crate::models::{Formulation, FormulationRequest};
use crate::prompt::build_prompt;
use crate::schema::{formulation_schema, parse_formulation};

/// Turns formulation requests into validated formulations.
///
/// Holds no per-call state: every `generate` builds its own prompt and makes
/// its own model call, so concurrent calls never interfere.
#[derive(Clone)]
pub struct FormulationService {
    model: Arc<dyn FormulationModel>,
    schema: Arc<Value>,
}

impl FormulationService {
    pub fn new(model: Arc<dyn FormulationModel>) -> Self {
        Self { model, schema: Arc::new(formulation_schema()) }
    }

    pub async fn generate(&self, request: &FormulationRequest) -> Result<Formulation, GenerationError> {
        let prompt = build_prompt(request);
        info!(
            "🚀 Generating {} formulation for product: {}",
            request.product_type, request.product_name
        );

        let raw = self.model.generate_json(&prompt, &self.schema).await.map_err(|e| {
            error!("❌ Model call failed: {}", e);
            e
        })?;

        match parse_formulation(&raw) {
            Ok(formulation) => {
                info!(
                    "✅ Formulation '{}' generated with {} phases, {} ingredients",
                    formulation.product_name,
                    formulation.phases.len(),
                    formulation.ingredient_count()
                );
                Ok(formulation)
            }
            Err(violation) => {
                error!("❌ Model reply rejected: {}", violation);
                Err(violation.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    use crate::models::{Effect, ProductType, SkinType, Texture};
    use crate::schema::SchemaViolation;

    struct ScriptedModel {
        reply: Result<String, String>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn replying(text: &str) -> Arc<Self> {
            Arc::new(Self { reply: Ok(text.to_string()), prompts: Mutex::default() })
        }
    }

    #[async_trait]
    impl FormulationModel for ScriptedModel {
        async fn generate_json(&self, prompt: &str, schema: &Value) -> Result<String, GenerationError> {
            assert_eq!(schema["type"], "OBJECT");
            self.prompts.lock().push(prompt.to_string());
            self.reply.clone().map_err(GenerationError::Transport)
        }
    }

    fn request() -> FormulationRequest {
        FormulationRequest {
            product_name: "朝の化粧水".into(),
            email: "lab@example.jp".into(),
            concept: "軽やかな保湿".into(),
            product_type: ProductType::Toner,
            skin_types: [SkinType::Combination].into_iter().collect(),
            effects: [Effect::Moisturizing].into_iter().collect(),
            featured_ingredients: vec![],
            include_ingredients: String::new(),
            exclude_ingredients: String::new(),
            texture: Texture::Watery,
        }
    }

    const TWO_PHASES: &str = r#"```json
{
  "productName": "朝の化粧水",
  "productType": "化粧水",
  "concept": "軽やかな保湿",
  "suitability": "混合肌",
  "estimatedCost": "約300円/個",
  "moq": "5,000個から",
  "phases": [
    {"phaseName": "A. 水相", "ingredients": [
      {"name": "精製水", "percentage": 92.4, "role": "溶媒"},
      {"name": "BG", "percentage": 7, "role": "保湿剤"}
    ]},
    {"phaseName": "B. 防腐相", "ingredients": [
      {"name": "フェノキシエタノール", "percentage": 0.6, "role": "防腐剤"}
    ]}
  ],
  "instructions": ["A相を均一に溶解", "B相を加えて撹拌"],
  "notes": "pH 6.0前後"
}
```"#;

    #[tokio::test]
    async fn round_trips_mocked_reply() {
        let model = ScriptedModel::replying(TWO_PHASES);
        let service = FormulationService::new(model.clone());
        let formulation = service.generate(&request()).await.unwrap();
        assert_eq!(formulation.phases.len(), 2);
        assert_eq!(formulation.ingredient_count(), 3);
        let percentages: Vec<f64> =
            formulation.phases.iter().flat_map(|p| p.ingredients.iter().map(|i| i.percentage)).collect();
        assert_eq!(percentages, vec![92.4, 7.0, 0.6]);
        assert_eq!(model.prompts.lock().len(), 1);
    }

    #[tokio::test]
    async fn each_call_hits_the_model() {
        let model = ScriptedModel::replying(TWO_PHASES);
        let service = FormulationService::new(model.clone());
        service.generate(&request()).await.unwrap();
        service.generate(&request()).await.unwrap();
        let prompts = model.prompts.lock();
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts[0], prompts[1]);
    }

    #[tokio::test]
    async fn missing_phases_surface_as_schema_error() {
        let reply = r#"{"productName":"x","productType":"化粧水","concept":"c","suitability":"s",
            "estimatedCost":"e","moq":"m","instructions":[],"notes":"n"}"#;
        let service = FormulationService::new(ScriptedModel::replying(reply));
        match service.generate(&request()).await {
            Err(GenerationError::Schema(SchemaViolation::MissingField(field))) => assert_eq!(field, "phases"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn transport_failure_propagates() {
        let model = Arc::new(ScriptedModel { reply: Err("status=429".into()), prompts: Mutex::default() });
        let service = FormulationService::new(model);
        let err = service.generate(&request()).await.unwrap_err();
        assert_eq!(err.kind(), "transport");
    }
}
