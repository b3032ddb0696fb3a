//! Luhn mod-10 checksum for order numbers

/// Check an order number with the Luhn algorithm
///
/// Every second digit from the right is doubled (subtracting 9 when the result
/// exceeds 9) and the number is valid when the digit sum is divisible by 10.
/// Empty strings and strings containing anything other than ASCII digits are
/// rejected.
///
/// ```
/// use loyalty_core::luhn;
///
/// assert!(luhn::is_valid("79927398713"));
/// assert!(!luhn::is_valid("79927398710"));
/// ```
pub fn is_valid(number: &str) -> bool {
    if number.is_empty() {
        return false;
    }

    let mut sum = 0u32;
    for (position, ch) in number.chars().rev().enumerate() {
        let Some(mut digit) = ch.to_digit(10) else {
            return false;
        };

        if position % 2 == 1 {
            digit *= 2;
            if digit > 9 {
                digit -= 9;
            }
        }

        sum += digit;
    }

    sum % 10 == 0
}
