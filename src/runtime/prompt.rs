//! 提示词：系统提示、委派工具文档、工具纠错提示

use crate::agent::Agent;

/// 由 Agent 的名称、角色设定与任务说明生成系统提示
pub fn system_prompt(agent: &Agent) -> String {
    format!(
        "你是智能体「{name}」。请在下述角色设定与任务范围内完成用户的请求。\n\
         \n\
         ## 角色设定\n\
         {persona}\n\
         \n\
         ## 任务范围\n\
         {description}\n\
         \n\
         ## 处理要求\n\
         1. 结合多轮对话上下文，确认用户本轮的真实意图。\n\
         2. 只处理任务范围内的请求，范围外的内容不作回答。\n\
         3. 与意图相关的工具都应被调用并正确返回；遗漏的工具要补充调用。\n\
         4. 依据工具的功能说明筛选其返回信息，只保留与该功能相关的部分。",
        name = agent.name(),
        persona = agent.persona(),
        description = agent.description(),
    )
}

/// 委派目标作为工具暴露时的文档
pub fn handoff_doc(agent: &Agent) -> String {
    format!(
        "调用该工具会把当前对话交给智能体「{}」处理，并返回它的回复。\n\n**角色设定**：\n{}\n\n**任务范围**：\n{}",
        agent.name(),
        agent.persona(),
        agent.description(),
    )
}

/// 本轮调用失败的工具列表 -> 要求模型修正参数后重试的用户消息
pub fn tool_error_prompt(failed: &[String]) -> String {
    format!(
        "上一轮以下工具调用失败：{:?}。请结合上下文与返回的错误信息，修正参数内容与格式后重新调用这些工具。",
        failed
    )
}
