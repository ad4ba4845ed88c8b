//! Vietnamese bookshop vocabulary used to fill augmentation templates.

pub const RECOMMEND_SYNONYMS: &[&str] = &[
    "gợi ý",
    "đề xuất",
    "tư vấn",
    "tham khảo",
    "cho tôi gợi ý",
    "muốn tham khảo",
    "tìm giúp tôi",
];

pub const ADD_SYNONYMS: &[&str] = &[
    "thêm",
    "cho vào giỏ",
    "bỏ vào giỏ",
    "cộng vào giỏ",
    "add vào giỏ",
    "mua",
    "mua thêm",
];

pub const AFFIRM_SYNONYMS: &[&str] = &["đúng rồi", "ok", "chuẩn", "đồng ý", "chính xác", "phải"];

pub const NEGATE_SYNONYMS: &[&str] = &["không", "không phải", "hủy", "hủy giúp", "không đâu", "đừng"];

pub const GREET_SYNONYMS: &[&str] = &["chào", "xin chào", "hello", "hi", "chào shop"];

pub const BYE_SYNONYMS: &[&str] = &["tạm biệt", "bye", "cảm ơn, tạm biệt", "bye shop"];

/// Lead-ins for price refinement. `{low}` and `{high}` are filled with the
/// range bounds drawn for the same example.
pub const REFINE_SYNONYMS: &[&str] = &[
    "giảm xuống",
    "lọc khoảng",
    "chỉ lấy trong tầm",
    "khoảng giá",
    "từ {low} đến {high}",
    "cỡ {low}",
];

pub const CATEGORIES: &[&str] = &[
    "văn học",
    "trinh thám",
    "kỹ năng",
    "kinh tế",
    "thiếu nhi",
    "tâm lý",
    "ngôn tình",
];

/// `k` and `nghìn` denote thousands; the others denote whole đồng.
pub const CURRENCY_UNITS: &[&str] = &["k", "nghìn", "đ", "vnđ", "vnd"];

pub const PRICE_MAGNITUDES: &[u32] = &[80, 100, 120, 150, 180, 200, 220, 250, 300];

pub const RANGE_MAGNITUDES: &[u32] = &[80, 100, 120, 150, 180, 200, 220, 250, 300, 500];

pub const QUANTITIES: &[u32] = &[1, 2, 3, 4];
