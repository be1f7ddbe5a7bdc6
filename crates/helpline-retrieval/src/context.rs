//! Context budgeting and grounded prompt assembly.

use helpline_core::types::{Document, Slot, SlotValues};

/// Rough token estimate: four characters per token.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

fn document_tokens(doc: &Document) -> usize {
    estimate_tokens(&doc.title) + estimate_tokens(&doc.content)
}

/// Documents selected for a prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedContext {
    pub documents: Vec<Document>,
    pub tokens: usize,
    /// Some retrieved text was left out (or clipped) to stay within budget.
    pub truncated: bool,
}

/// Greedily include documents in arrival order while the running estimate
/// stays within `budget`. The first document that does not fit stops packing.
/// If not even the first document fits, it is clipped to the budget.
pub fn pack_documents(documents: &[Document], budget: usize) -> PackedContext {
    let mut packed = PackedContext {
        documents: Vec::new(),
        tokens: 0,
        truncated: false,
    };

    for doc in documents {
        let cost = document_tokens(doc);
        if packed.tokens + cost <= budget {
            packed.tokens += cost;
            packed.documents.push(doc.clone());
            continue;
        }

        packed.truncated = true;
        if packed.documents.is_empty() {
            let room = budget.saturating_sub(estimate_tokens(&doc.title)) * 4;
            let clipped = Document {
                title: doc.title.clone(),
                content: doc.content.chars().take(room).collect(),
                category: doc.category.clone(),
            };
            packed.tokens += document_tokens(&clipped);
            packed.documents.push(clipped);
        }
        break;
    }

    packed
}

/// Prompt instructing the model to answer only from the packed documents.
pub fn grounded_prompt(question: &str, slots: &SlotValues, context: &PackedContext) -> String {
    // The response cache keys on a prompt prefix; department and question must fall inside it
    let mut prompt = format!(
        "Department: {}\nCaller's question: {question}\n\n",
        slots.get(Slot::Department)
    );
    prompt.push_str(
        "You are a clinical help desk assistant speaking with a caller over the phone.\n",
    );

    prompt.push_str(&format!(
        "Caller: {} ({}). Reported severity: {}.\n",
        slots.get(Slot::Name),
        slots.get(Slot::Role),
        slots.get(Slot::Severity),
    ));
    if slots.is_filled(Slot::Issue) {
        prompt.push_str(&format!(
            "Their original issue was: {}\n",
            slots.get(Slot::Issue)
        ));
    }

    prompt.push_str(
        "\nAnswer the caller's question using ONLY the reference material below. \
         If the material does not cover the question, say so briefly. \
         Keep the answer short, plain and suitable for being read aloud.\n",
    );
    if context.truncated {
        prompt.push_str(
            "Note: the reference material was cut short to fit and may be incomplete.\n",
        );
    }

    prompt.push_str("\nReference material:\n");
    for doc in &context.documents {
        prompt.push_str(&format!("--- {} ---\n{}\n", doc.title, doc.content.trim()));
    }

    prompt
}
