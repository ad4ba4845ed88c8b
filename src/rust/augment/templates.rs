use rand::Rng;

use super::lexicon::*;

/// A named synonym bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bank {
    Recommend,
    Add,
    Affirm,
    Negate,
    Greet,
    Bye,
    Refine,
}

impl Bank {
    pub fn phrases(self) -> &'static [&'static str] {
        match self {
            Bank::Recommend => RECOMMEND_SYNONYMS,
            Bank::Add => ADD_SYNONYMS,
            Bank::Affirm => AFFIRM_SYNONYMS,
            Bank::Negate => NEGATE_SYNONYMS,
            Bank::Greet => GREET_SYNONYMS,
            Bank::Bye => BYE_SYNONYMS,
            Bank::Refine => REFINE_SYNONYMS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Category,
    Quantity,
    Price,
    RangeLow,
    RangeHigh,
    Synonym(Bank),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Part {
    Text(&'static str),
    Slot(Slot),
}

use Part::{Slot as Fill, Text as Lit};

/// A template is a sequence of literal text and slots.
#[derive(Debug, Clone, Copy)]
pub struct Template(pub &'static [Part]);

const RECOMMEND: &[Template] = &[
    Template(&[
        Fill(Slot::Synonym(Bank::Recommend)),
        Lit(" cho tôi vài cuốn "),
        Fill(Slot::Category),
        Lit(" tầm "),
        Fill(Slot::Price),
    ]),
    Template(&[Lit("Tôi muốn sách "), Fill(Slot::Category), Lit(" khoảng "), Fill(Slot::Price)]),
    Template(&[Lit("Cần "), Fill(Slot::Category), Lit(" giá gần "), Fill(Slot::Price)]),
    Template(&[Fill(Slot::Synonym(Bank::Recommend)), Lit(" sách "), Fill(Slot::Category)]),
    Template(&[
        Lit("gợi ý sách "),
        Fill(Slot::Category),
        Lit(" trong tầm "),
        Fill(Slot::RangeLow),
        Lit(" đến "),
        Fill(Slot::RangeHigh),
    ]),
];

const ADD_TO_CART: &[Template] = &[
    Template(&[
        Fill(Slot::Synonym(Bank::Add)),
        Lit(" "),
        Fill(Slot::Quantity),
        Lit(" cuốn "),
        Fill(Slot::Category),
    ]),
    Template(&[Lit("mua "), Fill(Slot::Quantity), Lit(" quyển "), Fill(Slot::Category)]),
    Template(&[
        Fill(Slot::Synonym(Bank::Add)),
        Lit(" "),
        Fill(Slot::Quantity),
        Lit(" quyển giá "),
        Fill(Slot::Price),
    ]),
    Template(&[Lit("cho "), Fill(Slot::Quantity), Lit(" sách "), Fill(Slot::Category), Lit(" vào giỏ")]),
];

const REFINE: &[Template] = &[
    Template(&[
        Fill(Slot::Synonym(Bank::Refine)),
        Lit(" "),
        Fill(Slot::RangeLow),
        Lit(" đến "),
        Fill(Slot::RangeHigh),
    ]),
    Template(&[
        Lit("lọc "),
        Fill(Slot::Category),
        Lit(" trong tầm "),
        Fill(Slot::RangeLow),
        Lit("-"),
        Fill(Slot::RangeHigh),
    ]),
    Template(&[Lit("chỉ lấy khoảng "), Fill(Slot::Price)]),
];

const CONFIRM_YES: &[Template] = &[Template(&[Fill(Slot::Synonym(Bank::Affirm))])];
const CONFIRM_NO: &[Template] = &[Template(&[Fill(Slot::Synonym(Bank::Negate))])];
const GREETING: &[Template] = &[Template(&[Fill(Slot::Synonym(Bank::Greet))])];
const GOODBYE: &[Template] = &[Template(&[Fill(Slot::Synonym(Bank::Bye))])];

/// Labels that can be synthesized, with their templates.
pub const TEMPLATE_TABLE: &[(&str, &[Template])] = &[
    ("recommend", RECOMMEND),
    ("add_to_cart", ADD_TO_CART),
    ("refine", REFINE),
    ("confirm_yes", CONFIRM_YES),
    ("confirm_no", CONFIRM_NO),
    ("greeting", GREETING),
    ("goodbye", GOODBYE),
];

pub fn templates_for(label: &str) -> Option<&'static [Template]> {
    TEMPLATE_TABLE
        .iter()
        .find(|(name, _)| *name == label)
        .map(|(_, templates)| *templates)
}

/// Slot values drawn once per generated utterance.
#[derive(Debug, Clone)]
pub struct SlotValues {
    pub category: &'static str,
    pub quantity: u32,
    pub price: String,
    pub range: (String, String),
}

impl SlotValues {
    pub fn draw<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let category = *pick(rng, CATEGORIES);
        let range = range_phrase(rng);
        let price = price_phrase(rng);
        let quantity = *pick(rng, QUANTITIES);
        Self {
            category,
            quantity,
            price,
            range,
        }
    }
}

impl Template {
    /// Fills every slot. Synonym draws happen here, in slot order.
    pub fn render<R: Rng + ?Sized>(&self, values: &SlotValues, rng: &mut R) -> String {
        let mut out = String::new();
        for part in self.0 {
            match part {
                Part::Text(text) => out.push_str(text),
                Part::Slot(Slot::Category) => out.push_str(values.category),
                Part::Slot(Slot::Quantity) => out.push_str(&values.quantity.to_string()),
                Part::Slot(Slot::Price) => out.push_str(&values.price),
                Part::Slot(Slot::RangeLow) => out.push_str(&values.range.0),
                Part::Slot(Slot::RangeHigh) => out.push_str(&values.range.1),
                Part::Slot(Slot::Synonym(bank)) => {
                    let phrase = pick(rng, bank.phrases())
                        .replace("{low}", &values.range.0)
                        .replace("{high}", &values.range.1);
                    out.push_str(&phrase);
                }
            }
        }
        out
    }
}

pub(crate) fn pick<'a, T, R: Rng + ?Sized>(rng: &mut R, items: &'a [T]) -> &'a T {
    &items[rng.random_range(0..items.len())]
}

/// Formats a magnitude in the given unit. Thousand units keep the magnitude,
/// whole-đồng units multiply it by 1000.
pub fn format_price(value: u32, unit: &str) -> String {
    match unit {
        "k" => format!("{}k", value),
        "nghìn" => format!("{} nghìn", value),
        _ => format!("{}{}", value * 1000, unit),
    }
}

pub fn price_phrase<R: Rng + ?Sized>(rng: &mut R) -> String {
    let value = *pick(rng, PRICE_MAGNITUDES);
    let unit = *pick(rng, CURRENCY_UNITS);
    format_price(value, unit)
}

/// Two distinct magnitudes in ascending order. Each bound draws its own unit.
pub fn range_phrase<R: Rng + ?Sized>(rng: &mut R) -> (String, String) {
    let first = rng.random_range(0..RANGE_MAGNITUDES.len());
    let mut second = rng.random_range(0..RANGE_MAGNITUDES.len() - 1);
    if second >= first {
        second += 1;
    }
    let (low, high) = if RANGE_MAGNITUDES[first] <= RANGE_MAGNITUDES[second] {
        (RANGE_MAGNITUDES[first], RANGE_MAGNITUDES[second])
    } else {
        (RANGE_MAGNITUDES[second], RANGE_MAGNITUDES[first])
    };
    let low_unit = *pick(rng, CURRENCY_UNITS);
    let high_unit = *pick(rng, CURRENCY_UNITS);
    (format_price(low, low_unit), format_price(high, high_unit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn magnitude(phrase: &str) -> u32 {
        let digits: String = phrase.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse().unwrap()
    }

    fn thousands(phrase: &str) -> u32 {
        if phrase.ends_with('k') || phrase.ends_with("nghìn") {
            magnitude(phrase)
        } else {
            magnitude(phrase) / 1000
        }
    }

    #[test]
    fn test_format_price_units() {
        assert_eq!(format_price(80, "k"), "80k");
        assert_eq!(format_price(120, "nghìn"), "120 nghìn");
        assert_eq!(format_price(150, "đ"), "150000đ");
        assert_eq!(format_price(200, "vnđ"), "200000vnđ");
        assert_eq!(format_price(250, "vnd"), "250000vnd");
    }

    #[test]
    fn test_price_phrase_shapes() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let phrase = price_phrase(&mut rng);
            let value = magnitude(&phrase);
            let suffix = &phrase[value.to_string().len()..];
            match suffix {
                "k" => assert!(PRICE_MAGNITUDES.contains(&value)),
                " nghìn" => assert!(PRICE_MAGNITUDES.contains(&value)),
                "đ" | "vnđ" | "vnd" => {
                    assert_eq!(value % 1000, 0);
                    assert!(PRICE_MAGNITUDES.contains(&(value / 1000)));
                }
                other => panic!("unexpected suffix {:?} in {:?}", other, phrase),
            }
        }
    }

    #[test]
    fn test_range_phrase_is_strictly_ascending() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..500 {
            let (low, high) = range_phrase(&mut rng);
            assert!(thousands(&low) < thousands(&high), "{} !< {}", low, high);
        }
    }

    #[test]
    fn test_every_template_renders_without_placeholders() {
        let mut rng = StdRng::seed_from_u64(3);
        for (label, templates) in TEMPLATE_TABLE {
            for template in templates.iter() {
                for _ in 0..20 {
                    let values = SlotValues::draw(&mut rng);
                    let text = template.render(&values, &mut rng);
                    assert!(!text.trim().is_empty(), "{} rendered empty", label);
                    assert!(!text.contains('{'), "{} left a placeholder: {}", label, text);
                }
            }
        }
    }

    #[test]
    fn test_closed_form_labels_are_verbatim_synonyms() {
        let mut rng = StdRng::seed_from_u64(5);
        let templates = templates_for("greeting").unwrap();
        for _ in 0..50 {
            let values = SlotValues::draw(&mut rng);
            let text = templates[0].render(&values, &mut rng);
            assert!(GREET_SYNONYMS.contains(&text.as_str()));
        }
    }

    #[test]
    fn test_unknown_label_has_no_templates() {
        assert!(templates_for("track_order").is_none());
    }
}
