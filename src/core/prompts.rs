//! Instructions and prompt templates for every model call.
//!
//! Classifier instructions are public constants so that port doubles can
//! tell the call sites apart.

/// Sentence the generator is told to use when the context is insufficient
pub const UNANSWERABLE: &str = "This question cannot be answered from the available documents.";

pub const ROUTER_INSTRUCTIONS: &str = "\
You are an expert at routing a user question to the right data source.
The knowledge base holds private, internal material: company policies, \
technical documentation, operating manuals, process standards.
Routing rules:
- Questions about internal information, existing documents or technical \
standards go to knowledge_base.
- Questions about recent news, real-time information or general external \
knowledge go to web_search.
- If unsure, prefer knowledge_base.
Respond in JSON with a single key \"datasource\" whose value is \
\"knowledge_base\" or \"web_search\".";

pub const DOC_GRADER_INSTRUCTIONS: &str = "\
You are a grader assessing the relevance of a retrieved document to a user question.
Criteria:
- A document containing keywords or meaning related to the question is relevant.
- A document with at least some useful information for the question is relevant.
- A document that is entirely unrelated is not relevant.
Respond in JSON with a single key \"binary_score\" whose value is \"yes\" or \"no\".";

pub const HALLUCINATION_GRADER_INSTRUCTIONS: &str = "\
You are a strict fact checker.
Criteria:
1. The answer must be supported by the provided facts.
2. The answer must not contain information invented beyond those facts.
Scores:
- yes: the answer is fully grounded in the facts
- no: the answer contains invented or unsupported content
Respond in JSON with keys \"binary_score\" (\"yes\" or \"no\") and \"explanation\".";

pub const ANSWER_GRADER_INSTRUCTIONS: &str = "\
You are a grader assessing whether an answer resolves a question.
Criteria:
1. The answer helps to resolve the question.
2. The core of the question must be addressed.
Scores:
- yes: the answer resolves the question
- no: the answer does not resolve the question
Respond in JSON with keys \"binary_score\" (\"yes\" or \"no\") and \"explanation\".";

pub fn router_prompt(question: &str) -> String {
    format!(
        "User question: {question}\n\
         Decide which data source to use. Return JSON: \
         {{\"datasource\": \"knowledge_base or web_search\"}}"
    )
}

pub fn doc_grader_prompt(document: &str, question: &str) -> String {
    format!(
        "Retrieved document:\n{document}\n\
         User question:\n{question}\n\
         Carefully and objectively assess whether the document contains information \
         relevant to the question.\n\
         Return JSON: {{\"binary_score\": \"yes\" or \"no\"}}"
    )
}

pub fn rag_prompt(context: &str, question: &str) -> String {
    format!(
        "You are a professional knowledge assistant. Answer the user question \
         using the context provided.\n\
         Context:\n{context}\n\
         User question:\n{question}\n\
         Requirements:\n\
         1. Use only information from the context.\n\
         2. Be accurate, concise and professional.\n\
         3. If the context does not contain the answer, say \"{UNANSWERABLE}\"\n\
         Answer:"
    )
}

pub fn hallucination_prompt(documents: &str, generation: &str) -> String {
    format!(
        "Facts:\n{documents}\n\
         Generated answer:\n{generation}\n\
         Is the answer grounded in the facts?\n\
         Return JSON: {{\"binary_score\": \"yes\" or \"no\", \"explanation\": \"...\"}}"
    )
}

pub fn answer_prompt(question: &str, generation: &str) -> String {
    format!(
        "Question:\n{question}\n\
         Answer:\n{generation}\n\
         Does the answer resolve the question?\n\
         Return JSON: {{\"binary_score\": \"yes\" or \"no\", \"explanation\": \"...\"}}"
    )
}
