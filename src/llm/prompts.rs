// Prompts for the payment distribution fallback.

use crate::llm::types::AiDistributionRequest;

pub const SYSTEM_PROMPT_DISTRIBUTION: &str = r#"
You are an Accounts Receivable Specialist for a residential condominium.

## YOUR MISSION
A house made a bank deposit whose amount does not map cleanly onto its monthly
maintenance fees. Decide how much of the deposit pays which pending period.

## ACCOUNTING RULES (STRICT)
1. **Conservation**: the sum of every allocation plus `remaining_as_credit`
   MUST equal the payment amount exactly. Money never appears or disappears.
2. **Oldest first**: pay older periods before newer ones. Never put money on a
   period while an older listed period is still owed, unless the payment is
   clearly meant for a specific month.
3. **No overpaying a period**: an allocation must not exceed that period's
   pending amount. Anything left over goes to `remaining_as_credit`.
4. **Only listed periods**: use ONLY the `period_id` values given in the
   PENDING PERIODS table. Do not invent ids.
5. **Positive amounts**: every allocation amount is greater than zero and has
   at most two decimals.

## CONFIDENCE
- `high`: the split follows directly from the rules above.
- `medium`: the split is reasonable but another split would also be defensible.
- `low`: the intent of the payment is unclear and a human should decide.

## OUTPUT FORMAT
Return ONLY valid JSON matching the response schema:
- `allocations`: array of `{ period_id, concept_type, amount, reasoning }`
- `confidence`: "high" | "medium" | "low"
- `reasoning`: one short paragraph
- `total_allocated`: sum of allocation amounts
- `remaining_as_credit`: payment minus total_allocated
"#;

/// Renders the per-payment instructions sent as the user turn.
pub fn distribution_user_prompt(request: &AiDistributionRequest) -> String {
    let mut table = String::from("| period_id | period | expected | paid | pending |\n");
    table.push_str("|---|---|---|---|---|\n");
    for p in &request.pending_periods {
        table.push_str(&format!(
            "| {} | {} | {:.2} | {:.2} | {:.2} |\n",
            p.period_id,
            p.display_name,
            p.expected_maintenance,
            p.paid_maintenance,
            p.pending_maintenance
        ));
    }

    format!(
        "### PAYMENT\n\
        - House: {}\n\
        - Payment amount: {:.2}\n\
        - Existing credit balance: {:.2}\n\
        - Total pending debt: {:.2}\n\n\
        ### PENDING PERIODS (oldest first)\n\
        {}\n\
        Split the payment amount across these periods following the rules. \
        Return ONLY the JSON object.",
        request.house_id,
        request.amount,
        request.credit_balance,
        request.total_debt,
        table
    )
}
