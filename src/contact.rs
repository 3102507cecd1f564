//! Customer-facing links: the public tracking page and a prefilled
//! WhatsApp confirmation.

/// `<base>?id=<order_id>`
pub fn tracking_url(base: &str, order_id: &str) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{}{}id={}", base, separator, urlencoding::encode(order_id))
}

/// Digits only, with the India country code added when the number does not
/// already carry it.
pub fn normalize_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    let digits = digits.trim_start_matches('0');
    if digits.len() > 10 && digits.starts_with("91") {
        digits.to_string()
    } else {
        format!("91{}", digits)
    }
}

pub fn confirmation_message(customer: &str, order_id: &str, tracking: &str, company: &str) -> String {
    format!(
        "Hello {customer}, your order {order_id} has been created successfully!\n\
         Track your order:\n{tracking}\n\n\
         Thank you - {company}"
    )
}

/// `https://wa.me/<phone>?text=<message>`, or `None` without a usable number.
pub fn whatsapp_link(
    phone: &str,
    order_id: &str,
    customer: &str,
    tracking: &str,
    company: &str,
) -> Option<String> {
    if !phone.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    let message = confirmation_message(customer, order_id, tracking, company);
    Some(format!(
        "https://wa.me/{}?text={}",
        normalize_phone(phone),
        urlencoding::encode(&message)
    ))
}
