//! Prompt templates for routing, rewriting and answering.

use std::fmt::Write;

use crate::models::ParentDocument;

/// Upper bound on the recipe context placed in a prompt, in characters.
pub const MAX_CONTEXT_CHARS: usize = 2000;

const EMPTY_CONTEXT: &str = "暂无相关食谱信息。";

/// Chat-template control tokens that must not reach a prompt from user text.
const CONTROL_TOKENS: &[&str] = &["<|im_start|>", "<|im_end|>", "<|endoftext|>"];

/// Strip chat-template control tokens from user-supplied text.
pub fn sanitize(text: &str) -> String {
    CONTROL_TOKENS
        .iter()
        .fold(text.to_string(), |acc, token| acc.replace(token, ""))
}

pub fn route(question: &str) -> String {
    format!(
        "你是一个食谱问答系统的查询分类器。根据用户问题，只输出以下四个标签之一：\n\
         - chat：问候、闲聊或与烹饪无关的问题\n\
         - list：希望得到菜品推荐或菜品列表，例如“推荐几道素菜”“有什么简单的菜”\n\
         - detail：询问某道菜的具体做法、步骤或用料，例如“红烧肉怎么做”\n\
         - general：其他与烹饪相关的一般性问题\n\n\
         用户问题：{question}\n\n\
         只输出标签本身（chat、list、detail 或 general），不要输出任何其他内容。"
    )
}

pub fn rewrite(question: &str, history: &str) -> String {
    let history = if history.trim().is_empty() {
        "（无）"
    } else {
        history
    };
    format!(
        "你是一个食谱检索查询优化助手。请判断下面的用户问题是否需要改写。\n\
         - 如果问题已经完整、具体，原样输出问题。\n\
         - 如果问题含有指代（如“它”“这道菜”）或过于模糊，结合对话历史补全为一个独立、具体、适合检索的问题。\n\n\
         对话历史：\n{history}\n\n\
         用户问题：{question}\n\n\
         只输出最终的查询语句，不要解释。"
    )
}

pub fn basic_answer(question: &str, context: &str, history: &str) -> String {
    format!(
        "你是一位专业的烹饪助手。请根据以下食谱信息回答用户的问题，用一段简洁的话作答。\n\
         如果食谱信息不足以回答，请如实说明。\n\n\
         对话历史：\n{history}\n\n\
         食谱信息：{context}\n\n\
         用户问题：{question}\n\n\
         回答："
    )
}

pub fn step_by_step(question: &str, context: &str, history: &str) -> String {
    format!(
        "你是一位专业的烹饪导师。请根据以下食谱信息，为用户提供详细的分步骤指导。\n\
         回答按以下结构组织：\n\
         ## 🥘 菜品介绍\n\
         ## 🛒 所需食材\n\
         ## 👨‍🍳 制作步骤（逐步编号）\n\
         ## 💡 制作技巧\n\
         只使用食谱信息中出现的内容，缺失的部分可以省略。\n\n\
         对话历史：\n{history}\n\n\
         食谱信息：{context}\n\n\
         用户问题：{question}\n\n\
         详细回答："
    )
}

pub fn chat(question: &str, history: &str) -> String {
    format!(
        "你是一位友好的美食助手，正在与用户闲聊。请自然、简短地回应，\n\
         必要时可以引导用户询问菜谱相关的问题。\n\n\
         对话历史：\n{history}\n\n\
         用户：{question}\n\n\
         助手："
    )
}

pub fn vision() -> &'static str {
    "看一下这张图片里面有什么食材，只需要返回食材名称即可，用逗号隔开，其他的一律不要返回。\
     如果里面没有食材，则只返回 no ingredients found"
}

/// Format parent documents as a numbered recipe context, stopping before the
/// total would exceed [`MAX_CONTEXT_CHARS`].
pub fn build_context(docs: &[ParentDocument]) -> String {
    if docs.is_empty() {
        return EMPTY_CONTEXT.to_string();
    }

    let mut parts = Vec::new();
    let mut current_len = 0;

    for (i, doc) in docs.iter().enumerate() {
        let mut header = format!("【食谱 {}】", i + 1);
        if let Some(name) = doc.dish_name() {
            let _ = write!(header, " {name}");
        }
        if let Some(category) = doc.category() {
            let _ = write!(header, " | 分类: {category}");
        }
        if let Some(difficulty) = doc.difficulty() {
            let _ = write!(header, " | 难度: {difficulty}");
        }

        let doc_text = format!("{header}\n{}\n", doc.content);
        let doc_len = doc_text.chars().count();
        if current_len + doc_len > MAX_CONTEXT_CHARS {
            break;
        }
        current_len += doc_len;
        parts.push(doc_text);
    }

    if parts.is_empty() {
        return EMPTY_CONTEXT.to_string();
    }
    format!("\n{}\n{}", "=".repeat(50), parts.join("\n"))
}
