//! Prompt templates and the placeholder renderer.
//!
//! Templates are plain strings with `{name}` placeholders drawn from the
//! environment-info mapping plus task-specific fields. Each template spells
//! out the XML shape its response validator expects; the parser relies on a
//! single top-level `<response>` element.

/// Replace `{key}` placeholders. Unknown placeholders are left untouched so
/// a missing variable shows up verbatim in logs instead of vanishing.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

const ROLE_AND_RULES: &str = "\
<role>
你是一个科研专家团队中的一员，负责你所分管的研究问题。团队通过一棵研究树协作：
问题节点下挂解决方案，解决方案下挂子研究问题，逐层分解直到问题可以直接解决。
你的职责是基于已有的研究过程，为你负责的问题给出严谨、可执行的方案，或与你的负责人交流。
</role>
<rules>
1. 所有结论必须以环境信息中给出的事实为根据，不得虚构研究树中不存在的内容。
2. 子研究问题分为条件问题（证明假设，conditional）与实施问题（攻关解决，implementation）。
3. 条件问题不允许拥有解决方案，必须设计为查阅资料或运行一段代码即可证明或证伪的问题。
4. 输出必须是一个完整的<response>元素，除此之外不要输出任何多余内容。
</rules>";

const XML_FORMAT_RULE: &str = "\
1. 输出必须是完整、良构的XML：标签成对闭合，属性值使用双引号。
2. 正文中出现 < > & 等符号时，使用CDATA段或实体转义。
3. 不要在<response>元素之外输出任何文字。";

const ENVIRONMENT_INFORMATION: &str = "\
<environment_information>
<current_research_tree_full_text>
<content>
{current_research_tree_full_text}
</content>
<explanation>
当前完整研究树的压缩文本。[P]为问题节点，[S]为解决方案节点，(正启用)表示该方案是其问题当前选中的方案。
</explanation>
</current_research_tree_full_text>
<current_research_problem>
<content>
{current_research_problem}
</content>
<explanation>
你当前负责的研究问题的定义，包括名称、意义与评判标准。
</explanation>
</current_research_problem>
<root_problem>
<content>
{root_problem}
</content>
<explanation>
当前研究树的根问题，即团队的总体研究目标。
</explanation>
</root_problem>
<expert_solutions_of_all_ancestor_problems>
<content>
{expert_solutions_of_all_ancestor_problems}
</content>
<explanation>
从根问题到当前问题路径上所有上级专家的解决方案，代表团队已经确定的研究路线。
</explanation>
</expert_solutions_of_all_ancestor_problems>
<other_solutions_of_current_problem>
<content>
{other_solutions_of_current_problem}
</content>
<explanation>
当前问题下的其它（未选中）解决方案，可作为历史思路参考。
</explanation>
</other_solutions_of_current_problem>
<expert_solutions_of_all_descendant_problems>
<content>
{expert_solutions_of_all_descendant_problems}
</content>
<explanation>
当前选中方案之下所有后代专家的解决方案，代表已经开展的下游研究。
</explanation>
</expert_solutions_of_all_descendant_problems>
</environment_information>";

/// Solution creation for an unsolved implementation problem.
pub const CREATE_SOLUTION_PROMPT: &str = "\
{role_and_rules}
<task>
现在，你需要为解决当前问题设计方案，大致包括如下几步。
1. 接收信息：理解当前的完整研究过程，掌握其中已经得到的所有事实结论，理解用户当前要解决的问题。
2. 撰写顶层思考：分析当前问题对整体研究的价值、问题的本质与主要矛盾、以及为降低难度而设置的约束条件。
3. 撰写研究方案：由顶层思考出发设计子研究问题列表。先排条件问题，再排实施问题；每个子问题必须写明名称（问句形式）、意义与可执行的评判标准。若问题足够简单，研究方案可以为空。
4. 撰写实施方案：所有子问题解决后你亲自执行的收尾工作计划，必须显而易见可以落实。
5. 撰写方案论证：从可行性和高效性两方面论证方案，不遗漏任何一个子问题和实施步骤。
6. 为整体思路起一个一目了然的名字，不与研究树中已有节点重名。
</task>
<user_requirement>
{user_prompt}
</user_requirement>
<output_format>
你需要严格按以下XML格式输出，不要输出任何多余内容
<response>
<name>整体思路的名称</name>
<top_level_thoughts>顶层思考内容</top_level_thoughts>
<research_plan>
<sub_problem type=\"conditional|implementation\">
<name>用问句描述子问题</name>
<significance>本步骤的必要性</significance>
<criteria>明确可执行的成功评判标准</criteria>
</sub_problem>
<!-- 可以设计0个或多个子研究问题；不设计时保留空的research_plan标签 -->
</research_plan>
<implementation_plan>实施方案内容</implementation_plan>
<plan_justification>方案论证内容</plan_justification>
</response>
</output_format>
<xml_format_rule>
{xml_format_rule}
</xml_format_rule>
{environment_information}";

/// Accept-or-reply decision on a user's modification request.
pub const HANDLE_MODIFICATION_REQUESTS_PROMPT: &str = "\
{role_and_rules}
<task>
现在{supervisor_name}对你的解决方案提出了疑问或修改要求，你需要理解这些疑问或要求，并决定按要求修改还是回复他。
1. 接收信息：理解当前的完整研究过程、你自己的研究方案、以及你和{supervisor_name}之间的历史对话。
2. 判断{supervisor_name}的意图：
    0. 当且仅当对方的消息中存在“请修改”三个字，应视为要求修改，否则一律视为希望你回复他。
       如果消息极其像一个明确的修改要求但不包含这三个字，你应该回复他，告诉他你需要更明确的要求才能修改。
    1. 如果对方希望你回答问题，理解问题及其背后的考虑，并回复他。
    2. 如果你选择接受修改，必须综合之前对话中所有未被撤销的修改意见，制定一份修改清单作为修改计划。
</task>
<output_format>
你需要严格按以下XML格式输出，不要输出任何多余内容
<response>
<decision type=\"accept\" 或 \"reply\">
<reasoning>决策理由，不超过100字</reasoning>
<modification_plan>修改计划（仅当type为accept时提供，不超过300字）</modification_plan>
<response_to_user>对{supervisor_name}的回复（仅当type为reply时提供）</response_to_user>
</decision>
</response>
</output_format>
<xml_format_rule>
{xml_format_rule}
</xml_format_rule>
<current_solution>
{current_solution}
</current_solution>
<message_list>
{message_list}
</message_list>
<modification_request>
<content>
{modification_request}
</content>
<explanation>
{supervisor_name}对你提出的疑问或修改要求。
</explanation>
</modification_request>
{environment_information}";

/// Solution rewrite after an accepted modification request.
pub const MODIFY_SOLUTION_PROMPT: &str = "\
{role_and_rules}
<task>
经过与{supervisor_name}的讨论，你最终决定对你的解决方案作出修改。
你需要在当前方案的基础上为解决当前问题设计新的方案：
1. 接收信息：理解当前的完整研究过程、你之前的方案、你们之间的历史对话、以及你制定的修改计划。
2. 依次撰写新的顶层思考、研究方案、实施方案与方案论证。
3. 为修改后的整体思路起一个新名字，不与当前方案或其它节点重名。
</task>
<inherit_rule>
{current_solution_sub_problem_list}
以上是你当前方案的子研究问题名称列表。设计新研究方案时，你可以用type=\"inherit\"继承其中的问题：
1. 继承问题只有名称字段有效，名称必须与被继承的原问题完全相同，其余字段一律省略。
2. 被继承问题已完成的下游研究将被原封不动保留；未被继承的问题及其下游研究将被丢弃。
3. 继承前必须确认该问题的定义无需任何修改即可适配新方案，否则请重新设计该问题。
</inherit_rule>
<modify_plan>
<content>
{modify_plan}
</content>
<explanation>
你在决定修改时制定的修改计划。你可以参考它，也可以在发现不完善之处时做出调整。
</explanation>
</modify_plan>
<output_format>
你需要严格按以下XML格式输出，不要输出任何多余内容
<response>
<name>整体思路的名称</name>
<top_level_thoughts>顶层思考内容</top_level_thoughts>
<research_plan>
<sub_problem type=\"conditional|implementation|inherit\">
<name>问题名称</name>
<significance>非继承问题必填</significance>
<criteria>非继承问题必填</criteria>
</sub_problem>
<!-- 可以有0个或多个sub_problem -->
</research_plan>
<implementation_plan>实施方案内容</implementation_plan>
<plan_justification>方案论证内容</plan_justification>
</response>
</output_format>
<xml_format_rule>
{xml_format_rule}
</xml_format_rule>
<current_solution>
{current_solution}
</current_solution>
<message_list>
{message_list}
</message_list>
{environment_information}";

/// Base variables every template shares.
pub fn base_vars() -> Vec<(&'static str, &'static str)> {
    vec![
        ("role_and_rules", ROLE_AND_RULES),
        ("xml_format_rule", XML_FORMAT_RULE),
        ("environment_information", ENVIRONMENT_INFORMATION),
    ]
}
