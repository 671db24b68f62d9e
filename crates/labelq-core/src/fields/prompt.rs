//! Extraction instructions per label type.

use crate::models::task::{LabelType, NOT_FOUND};

/// What each field means, shown to the model after the field name.
fn field_hint(name: &str) -> &'static str {
    match name {
        "tracking_number" => {
            "The shipment tracking number (e.g. SPXVM056647973), often labeled \"Tracking No.\", \"Tracking ID\" or \"Mã vận đơn\". If several are present, prefer the primary or longest one."
        }
        "order_id" => "The customer order id, often labeled \"Order ID\" or \"Mã đơn hàng\".",
        "sender_address" => {
            "Full sender name, phone number and address, typically after \"FROM\", \"Từ\" or \"Sender\"."
        }
        "recipient_address" => {
            "Full receiver name, phone number and address, typically after \"TO\", \"Đến\" or \"Receiver\"."
        }
        "delivery_date" => "Expected or printed delivery date.",
        "return_id" => "The return authorization or return id.",
        "return_reason" => "Reason given for the return.",
        "return_date" => "Date the return was issued.",
        "product_name" => "Name of the product.",
        "product_code" => "Product code, SKU or barcode number.",
        "manufacturer" => "Manufacturer or brand name.",
        "manufacture_date" => "Manufacture or production date.",
        _ => "",
    }
}

/// Instruction sent together with the document text.
///
/// Names every expected key, the sentinel for absent values, and demands a
/// bare JSON object.
pub fn instruction(label_type: LabelType) -> String {
    let mut out = format!(
        "You analyze {label} labels from various couriers and vendors. Labels may be in \
         different languages (including Vietnamese and English) and may mix printed and \
         handwritten text.\nExtract the following fields from the label text:\n",
        label = label_type
    );

    for (index, name) in label_type.field_names().iter().enumerate() {
        out.push_str(&format!("{}. {}: {}\n", index + 1, name, field_hint(name)));
    }

    let example = label_type
        .field_names()
        .iter()
        .map(|name| format!("\"{}\": \"...\"", name))
        .collect::<Vec<_>>()
        .join(", ");

    out.push_str(&format!(
        "If a field is missing, ambiguous or not found, use the value \"{NOT_FOUND}\".\n\
         Return ONLY a single valid JSON object whose values are strings. \
         Do not include explanations or markdown formatting.\n\
         Example output: {{{example}}}\n"
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_names_every_field() {
        for label_type in LabelType::ALL {
            let text = instruction(label_type);
            for name in label_type.field_names() {
                assert!(text.contains(name), "{label_type}: missing {name}");
            }
            assert!(text.contains("\"Not found\""));
            assert!(text.contains("ONLY a single valid JSON object"));
        }
    }

    #[test]
    fn test_every_field_has_a_hint() {
        for label_type in LabelType::ALL {
            for name in label_type.field_names() {
                assert!(!field_hint(name).is_empty(), "no hint for {name}");
            }
        }
    }
}
