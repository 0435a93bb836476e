//! Answer generation strategy per route.
//!
//! | route   | strategy                                      |
//! |---------|-----------------------------------------------|
//! | chat    | free chat completion, no documents            |
//! | list    | up to three dish names, formatted locally     |
//! | detail  | step-by-step generation over recipe context   |
//! | general | single-paragraph generation over context      |
//!
//! Every strategy has a synchronous and a streaming form, and the stream's
//! fragments always concatenate to the synchronous answer.

use futures_util::stream::{self, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::llm::client::TextGenerator;
use crate::llm::prompts;
use crate::models::{ParentDocument, RouteType};

/// Returned instead of generating when retrieval found nothing.
pub const NO_RESULTS_APOLOGY: &str = "抱歉，没有找到相关的食谱信息。请尝试其他菜品名称或关键词。";

/// Dish names listed before the remainder is summarised.
const MAX_LISTED_DISHES: usize = 3;

/// Ordered, finite answer fragments. Ends after the first error.
pub type AnswerStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

enum Plan {
    /// Deterministic text, no model call.
    Fixed(Vec<String>),
    /// Prompt for the text generator.
    Generate(String),
}

pub struct AnswerPipeline {
    generator: Arc<dyn TextGenerator>,
}

impl AnswerPipeline {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    pub async fn answer(
        &self,
        route: RouteType,
        question: &str,
        docs: &[ParentDocument],
        history: &str,
    ) -> Result<String> {
        match plan(route, question, docs, history) {
            Plan::Fixed(fragments) => Ok(fragments.concat()),
            Plan::Generate(prompt) => self
                .generator
                .complete(&prompt)
                .await
                .map_err(EngineError::GenerationFailure),
        }
    }

    /// Streaming form of [`AnswerPipeline::answer`]. A failure while
    /// connecting is returned directly; a failure mid-stream is yielded once
    /// and ends the stream.
    pub async fn answer_stream(
        &self,
        route: RouteType,
        question: &str,
        docs: &[ParentDocument],
        history: &str,
    ) -> Result<AnswerStream> {
        let prompt = match plan(route, question, docs, history) {
            Plan::Fixed(fragments) => {
                return Ok(Box::pin(stream::iter(fragments.into_iter().map(Ok))));
            }
            Plan::Generate(prompt) => prompt,
        };

        let mut upstream = self
            .generator
            .complete_stream(&prompt)
            .await
            .map_err(EngineError::GenerationFailure)?;

        Ok(Box::pin(async_stream::stream! {
            while let Some(item) = upstream.next().await {
                match item {
                    Ok(fragment) => yield Ok(fragment),
                    Err(e) => {
                        tracing::warn!("Answer stream failed: {e:#}");
                        yield Err(EngineError::GenerationFailure(e));
                        break;
                    }
                }
            }
        }))
    }
}

fn plan(route: RouteType, question: &str, docs: &[ParentDocument], history: &str) -> Plan {
    if route == RouteType::Chat {
        return Plan::Generate(prompts::chat(question, history));
    }
    if docs.is_empty() {
        return Plan::Fixed(vec![NO_RESULTS_APOLOGY.to_string()]);
    }

    match route {
        RouteType::List => Plan::Fixed(list_fragments(docs)),
        RouteType::Detail => Plan::Generate(prompts::step_by_step(
            question,
            &prompts::build_context(docs),
            history,
        )),
        RouteType::General | RouteType::Chat => Plan::Generate(prompts::basic_answer(
            question,
            &prompts::build_context(docs),
            history,
        )),
    }
}

/// Recommendation list over the distinct dish names in `docs`.
fn list_fragments(docs: &[ParentDocument]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for doc in docs {
        let name = doc.dish_name().unwrap_or_else(|| "未知菜品".to_string());
        if !names.contains(&name) {
            names.push(name);
        }
    }

    if let [only] = names.as_slice() {
        return vec![format!("为您推荐：{only}")];
    }

    let mut fragments = vec!["为您推荐以下菜品：\n".to_string()];
    fragments.extend(
        names
            .iter()
            .take(MAX_LISTED_DISHES)
            .enumerate()
            .map(|(i, name)| format!("{}. {name}\n", i + 1)),
    );
    if names.len() > MAX_LISTED_DISHES {
        fragments.push(format!(
            "\n还有其他 {} 道菜品可供选择。",
            names.len() - MAX_LISTED_DISHES
        ));
    }
    fragments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedGenerator;
    use crate::models::Metadata;
    use serde_json::json;

    fn doc(name: &str) -> ParentDocument {
        let mut metadata = Metadata::new();
        metadata.insert("dish_name".into(), json!(name));
        ParentDocument {
            parent_id: name.into(),
            content: format!("{name}的做法"),
            metadata,
        }
    }

    async fn collect(stream: AnswerStream) -> Vec<Result<String>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_list_of_five_names_three() {
        let generator = Arc::new(ScriptedGenerator::default());
        let pipeline = AnswerPipeline::new(generator.clone());
        let docs: Vec<_> = ["红烧肉", "糖醋排骨", "宫保鸡丁", "鱼香肉丝", "麻婆豆腐"]
            .into_iter()
            .map(doc)
            .collect();

        let answer = pipeline
            .answer(RouteType::List, "推荐几道菜", &docs, "")
            .await
            .unwrap();
        assert_eq!(
            answer,
            "为您推荐以下菜品：\n1. 红烧肉\n2. 糖醋排骨\n3. 宫保鸡丁\n\n还有其他 2 道菜品可供选择。"
        );
        assert!(!answer.contains("鱼香肉丝"));

        let streamed: String = collect(
            pipeline
                .answer_stream(RouteType::List, "推荐几道菜", &docs, "")
                .await
                .unwrap(),
        )
        .await
        .into_iter()
        .map(|f| f.unwrap())
        .collect();
        assert_eq!(streamed, answer);
        assert_eq!(generator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_list_single_and_duplicate_names() {
        let pipeline = AnswerPipeline::new(Arc::new(ScriptedGenerator::default()));
        let answer = pipeline
            .answer(RouteType::List, "q", &[doc("拍黄瓜"), doc("拍黄瓜")], "")
            .await
            .unwrap();
        assert_eq!(answer, "为您推荐：拍黄瓜");
    }

    #[tokio::test]
    async fn test_empty_documents_apologise_without_generation() {
        for route in [RouteType::List, RouteType::Detail, RouteType::General] {
            let generator = Arc::new(ScriptedGenerator::default());
            let pipeline = AnswerPipeline::new(generator.clone());
            let answer = pipeline.answer(route, "q", &[], "").await.unwrap();
            assert_eq!(answer, NO_RESULTS_APOLOGY);
            assert_eq!(generator.call_count(), 0);
        }
    }

    #[tokio::test]
    async fn test_empty_documents_stream_the_apology() {
        for route in [RouteType::List, RouteType::Detail, RouteType::General] {
            let generator = Arc::new(ScriptedGenerator::default());
            let pipeline = AnswerPipeline::new(generator.clone());
            let streamed: String = collect(pipeline.answer_stream(route, "q", &[], "").await.unwrap())
                .await
                .into_iter()
                .map(|f| f.unwrap())
                .collect();
            assert_eq!(streamed, NO_RESULTS_APOLOGY);
            assert_eq!(generator.call_count(), 0);
        }
    }

    #[tokio::test]
    async fn test_dropping_stream_releases_upstream() {
        use std::sync::atomic::{AtomicBool, Ordering};

        struct SetOnDrop(Arc<AtomicBool>);

        impl Drop for SetOnDrop {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        struct NeverFinishes {
            released: Arc<AtomicBool>,
        }

        #[async_trait::async_trait]
        impl TextGenerator for NeverFinishes {
            async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
                unreachable!()
            }

            async fn complete_stream(
                &self,
                _prompt: &str,
            ) -> anyhow::Result<crate::llm::client::FragmentStream> {
                let guard = SetOnDrop(self.released.clone());
                Ok(Box::pin(async_stream::stream! {
                    let _guard = guard;
                    yield Ok::<_, anyhow::Error>("红烧肉".to_string());
                    futures_util::future::pending::<()>().await;
                }))
            }
        }

        let released = Arc::new(AtomicBool::new(false));
        let pipeline = AnswerPipeline::new(Arc::new(NeverFinishes {
            released: released.clone(),
        }));
        let mut stream = pipeline
            .answer_stream(RouteType::General, "q", &[doc("红烧肉")], "")
            .await
            .unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), "红烧肉");
        assert!(!released.load(Ordering::SeqCst));

        drop(stream);
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_chat_generates_without_documents() {
        let generator = Arc::new(ScriptedGenerator::new(["你好呀！"]));
        let pipeline = AnswerPipeline::new(generator.clone());
        let answer = pipeline
            .answer(RouteType::Chat, "你好", &[], "")
            .await
            .unwrap();
        assert_eq!(answer, "你好呀！");
        assert_eq!(generator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_detail_stream_matches_sync() {
        let reply = "## 🥘 菜品介绍\n红烧肉是经典家常菜。\n## 👨‍🍳 制作步骤\n1. 焯水";
        let generator = Arc::new(ScriptedGenerator::new([reply, reply]));
        let pipeline = AnswerPipeline::new(generator.clone());
        let docs = [doc("红烧肉")];

        let sync = pipeline
            .answer(RouteType::Detail, "红烧肉怎么做", &docs, "")
            .await
            .unwrap();
        let fragments = collect(
            pipeline
                .answer_stream(RouteType::Detail, "红烧肉怎么做", &docs, "")
                .await
                .unwrap(),
        )
        .await;
        assert!(fragments.len() > 1);
        let streamed: String = fragments.into_iter().map(|f| f.unwrap()).collect();
        assert_eq!(streamed, sync);

        let prompts = generator.prompts.lock();
        assert!(prompts[0].contains("【食谱 1】 红烧肉"));
        assert!(prompts[0].contains("详细回答"));
    }

    #[tokio::test]
    async fn test_generation_failure_propagates() {
        let pipeline = AnswerPipeline::new(Arc::new(ScriptedGenerator::failing()));
        let err = pipeline
            .answer(RouteType::General, "q", &[doc("a")], "")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "generation_failure");
    }

    #[tokio::test]
    async fn test_stream_closes_after_error() {
        struct BreaksMidway;

        #[async_trait::async_trait]
        impl TextGenerator for BreaksMidway {
            async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
                unreachable!()
            }

            async fn complete_stream(
                &self,
                _prompt: &str,
            ) -> anyhow::Result<crate::llm::client::FragmentStream> {
                let items = vec![
                    Ok("第一段".to_string()),
                    Err(anyhow::anyhow!("connection reset")),
                    Ok("never seen".to_string()),
                ];
                Ok(Box::pin(stream::iter(items)))
            }
        }

        let pipeline = AnswerPipeline::new(Arc::new(BreaksMidway));
        let items = collect(
            pipeline
                .answer_stream(RouteType::General, "q", &[doc("a")], "")
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "第一段");
        assert_eq!(items[1].as_ref().unwrap_err().kind(), "generation_failure");
    }
}
