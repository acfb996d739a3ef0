pub const CARD_NUMBER_LEN: usize = 16;

/// Checks a card number with the Luhn algorithm. Spaces are ignored; anything
/// else that is not a digit, or a length other than sixteen digits, fails.
pub fn valid_card_number(number: &str) -> bool {
    let digits: Option<Vec<u32>> = number
        .chars()
        .filter(|c| *c != ' ')
        .map(|c| c.to_digit(10))
        .collect();
    let Some(digits) = digits else {
        return false;
    };
    if digits.len() != CARD_NUMBER_LEN {
        return false;
    }

    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &digit)| {
            if i % 2 == 1 {
                let doubled = digit * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                digit
            }
        })
        .sum();
    sum % 10 == 0
}
