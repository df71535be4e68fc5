// Prompt for the single-step bill extraction call

use crate::error::Result;
use crate::schema::BillExtraction;

pub const BILL_EXTRACTION_PROMPT: &str = r#"
You are reading an electricity bill from Light (Rio de Janeiro, Brazil). The attached PDF is the
bill. Extract the data below and return it as a single JSON object.

## FIELDS
- `valor_total` (number): Total amount to pay.
- `mes_referencia` (string): Reference month exactly as printed (e.g. "JANEIRO/2024").
- `vencimento` (string): Due date (e.g. "20/01/2024").
- `consumo_kwh` (number): Total billed consumption in kWh.
- `codigo_instalacao` (string): Installation / customer code.
- `leitura_atual` (string): Date of the current meter reading.
- `leitura_proxima` (string): Scheduled date of the next meter reading.
- `bandeira_tarifaria` (string): Tariff flag color in force ("Verde", "Amarela", "Vermelha").
  If the cycle was split between two flags, write both (e.g. "Amarela e Vermelha").
- `adicional_bandeira` (number): Extra amount charged because of the flag, or null.
- `detalhes_tarifas` (list of objects): Billing composition lines, each with `descricao` and `valor`.

## RULES
- If a field is not found, use null. Never invent values.
- Dates use DD/MM/YYYY.
- Amounts are plain JSON numbers: "R$ 1.234,56" becomes 1234.56.
- Return ONLY the JSON object, no markdown fences, no commentary.
"#;

/// Full extraction prompt: the instructions followed by the JSON Schema of the expected object.
pub fn bill_extraction_prompt() -> Result<String> {
    let schema = schemars::schema_for!(BillExtraction);
    let schema_json = serde_json::to_string_pretty(&schema)?;
    Ok(format!(
        "{}\n## JSON SCHEMA\n```json\n{}\n```\n",
        BILL_EXTRACTION_PROMPT.trim_end(),
        schema_json
    ))
}
