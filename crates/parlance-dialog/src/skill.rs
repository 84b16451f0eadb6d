//! Skill descriptors: read-only configuration for each assistant persona.
//!
//! A skill names its system prompt (per language), the tools it may call, and
//! the escape tools that move control to another dialog node. Skills are
//! constructed once at startup and never mutated per call.

use crate::tools::{ToolSchema, TRANSFER_TO_LIVE_AGENT_TOOL, VALIDATE_PAYMENT_TOOL};
use parlance_core::{ConversationSession, Language, PRIMARY_SKILL};
use serde_json::json;

/// Escape tool that the model calls to move control to another skill.
/// It is never executed; the router transfers control on its name alone.
#[derive(Debug, Clone)]
pub struct EscapeTool {
    pub name: String,
    pub description: String,
    /// Dialog node that receives control when this tool is invoked.
    pub target: String,
}

/// System prompt text per supported language.
#[derive(Debug, Clone)]
pub struct SkillPrompt {
    pub en: String,
    pub kr: String,
}

impl SkillPrompt {
    pub fn text(&self, language: Language) -> &str {
        match language {
            Language::En => &self.en,
            Language::Kr => &self.kr,
        }
    }
}

/// Read-only description of one skill.
#[derive(Debug, Clone)]
pub struct SkillDescriptor {
    /// Skill name; doubles as its dialog node name.
    pub name: String,
    pub prompt: SkillPrompt,
    /// Names of real tools bound to this skill, resolved via the registry.
    pub tool_names: Vec<String>,
    /// Escape tools mapped to the node that receives control.
    pub escape_tools: Vec<EscapeTool>,
    /// Hand-off message emitted when entering this skill. Sub-skills only.
    pub entry_message: Option<String>,
}

impl SkillDescriptor {
    pub fn is_primary(&self) -> bool {
        self.name == PRIMARY_SKILL
    }

    /// Name of the tool-execution node serving this skill.
    pub fn tools_node_name(&self) -> String {
        format!("{}_tools", self.name)
    }

    /// Name of the entry adapter node for this sub-skill.
    pub fn enter_node_name(&self) -> String {
        format!("enter_{}", self.name)
    }

    /// Node receiving control when the named escape tool is invoked.
    pub fn escape_target(&self, tool_name: &str) -> Option<&str> {
        self.escape_tools
            .iter()
            .find(|t| t.name == tool_name)
            .map(|t| t.target.as_str())
    }

    /// Full system prompt for this session: language-profile preamble plus
    /// the skill prompt in the session's language.
    pub fn system_prompt(&self, session: &ConversationSession) -> String {
        let prompt = self.prompt.text(session.language);
        let preamble = session.profile.prompt_preamble.trim();
        if preamble.is_empty() {
            prompt.to_string()
        } else {
            format!("{preamble}\n{prompt}")
        }
    }

    /// Escape tools rendered as argument-less schemas for model binding.
    pub fn escape_schemas(&self) -> Vec<ToolSchema> {
        self.escape_tools
            .iter()
            .map(|t| ToolSchema {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: json!({ "type": "object", "properties": {} }),
            })
            .collect()
    }
}

/// Escape tool name entering the make-payment skill.
pub const TO_MAKE_PAYMENT_TOOL: &str = "ToMakePaymentAssistant";
/// Escape tool name leaving a sub-skill back to the host assistant.
pub const COMPLETE_OR_ESCALATE_TOOL: &str = "CompleteOrEscalate";

/// Name of the make-payment sub-skill.
pub const MAKE_PAYMENT_SKILL: &str = "make_payment";

/// The payment-collection skill set: the primary assistant plus the
/// make-payment sub-skill.
pub fn payment_collection_skills() -> Vec<SkillDescriptor> {
    let primary = SkillDescriptor {
        name: PRIMARY_SKILL.to_string(),
        prompt: SkillPrompt {
            en: "You are Meridian, a virtual assistant for Meridian Financial. You MUST use the \
                 provided tools to route the customers to the appropriate specialist to make \
                 payments."
                .to_string(),
            kr: "메리디안 금융을 위한 가상 비서 메리디안입니다. 고객이 적절한 전문가에게 연결될 수 \
                 있도록 제공된 도구를 반드시 사용해야 합니다. 고객이 돈을 내겠다는 요구를 하면 \
                 ToMakePaymentAssistant 를 사용하십시오. 실제 상담원과 통화를 하고 싶다고 한다면 \
                 transfer_to_live_agent 를 사용하십시오."
                .to_string(),
        },
        tool_names: vec![TRANSFER_TO_LIVE_AGENT_TOOL.to_string()],
        escape_tools: vec![EscapeTool {
            name: TO_MAKE_PAYMENT_TOOL.to_string(),
            description: "Help the customer with one-time payments and promises to pay. Use this \
                          tool when a customer expresses interest in making a payment, when they \
                          need to set up a promise to pay arrangement, or if they are letting you \
                          know that they will be late with making their monthly payment. When \
                          calling this tool, your context should not divulge the presence of other \
                          specialized assistants. Generate something contextually relevant, with \
                          regards to the conversation, like \"Give me a second. Just pulling up my \
                          payment system\". Do not call this tool to set up automatic payments."
                .to_string(),
            target: "enter_make_payment".to_string(),
        }],
        entry_message: None,
    };

    let make_payment = SkillDescriptor {
        name: MAKE_PAYMENT_SKILL.to_string(),
        prompt: SkillPrompt {
            en: "You are Meridian, a virtual assistant for Meridian Financial. Your main task is \
                 to help customers make payments or note promises to pay. Always maintain a \
                 professional tone and stay focussed on the task at hand. Do not discuss any \
                 issues outside of the customer's loan with Meridian Financial. If the customer \
                 has not specified a particular date or circumstance [e.g. I need a late payment, \
                 schedule a payment, or I need some more time], offer to pay the total due amount \
                 first: \"Would you like to pay the total of $300 today?\". If they have mentioned \
                 a particular condition, work with the customer to set a payment date and amount. \
                 You MUST call validate_payment_amount_date tool once you have a payment date and \
                 amount. Schedule only one payment at a time. Use CompleteOrEscalate if the \
                 customer wants to do anything else other than make a one-time payment. Be \
                 empathetic and patient throughout."
                .to_string(),
            kr: "메리디안 금융을 위한 가상 비서 메리디안입니다. 주요 업무는 고객이 결제를 진행하거나 \
                 결제 약속을 기록하도록 돕는 것입니다. 항상 전문적인 어조를 유지하며, 주어진 업무에 \
                 집중해야 합니다. 메리디안 금융과 관련된 대출 이외의 문제에 대해 논의하지 마십시오. \
                 고객이 특정 날짜나 상황을 명시하지 않은 경우, 우선 총 납부 금액 결제를 제안하십시오. \
                 예: \"오늘 총 10만원을 결제하시겠습니까?\" 고객이 특정 조건을 언급한 경우, 고객과 \
                 협력하여 결제 날짜와 금액을 설정하십시오. 결제 날짜와 금액을 확인한 후 반드시 \
                 validate_payment_amount_date 도구를 호출해야 합니다. 한 번에 하나의 결제만 \
                 예약하십시오. 고객이 일회성 결제 이외의 다른 요청을 하는 경우 CompleteOrEscalate를 \
                 사용하십시오. 항상 공감하고 인내심을 갖고 대응하십시오."
                .to_string(),
        },
        tool_names: vec![VALIDATE_PAYMENT_TOOL.to_string()],
        escape_tools: vec![EscapeTool {
            name: COMPLETE_OR_ESCALATE_TOOL.to_string(),
            description: "Route the customer to an appropriate system to answer their query. You \
                          MUST call this tool if the customer asks you for information that you do \
                          not have the answer to or would like to perform a different action. Do \
                          not divulge the existence of the specialized agent to the customer. When \
                          calling this tool, your context should not divulge the presence of the \
                          tool. Generate something short and contextually relevant such as \"Give \
                          me a second.\" Do NOT divulge the name or existence of this tool to the \
                          customer."
                .to_string(),
            target: "leave_skill".to_string(),
        }],
        entry_message: Some(
            "The conversation has been routed to the Make Payment Assistant. Please reflect on \
             the past conversation."
                .to_string(),
        ),
    };

    vec![primary, make_payment]
}
