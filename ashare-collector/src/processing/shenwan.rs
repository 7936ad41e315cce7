//! Shenwan (SWS) level-1 industry inference from free-form source labels.

/// The 31 Shenwan level-1 industries (2021 revision).
pub const SHENWAN_LEVEL1: &[&str] = &[
    "农林牧渔", "基础化工", "钢铁", "有色金属", "电子", "家用电器", "食品饮料", "纺织服饰",
    "轻工制造", "医药生物", "公用事业", "交通运输", "房地产", "商贸零售", "社会服务", "综合",
    "建筑材料", "建筑装饰", "电力设备", "国防军工", "计算机", "传媒", "通信", "银行",
    "非银金融", "汽车", "机械设备", "煤炭", "石油石化", "环保", "美容护理",
];

/// Fallback when nothing matches.
pub const DEFAULT_LEVEL1: &str = "综合";

/// Keyword → level-1 map, checked in order after exact names.
const KEYWORDS: &[(&str, &str)] = &[
    ("银行", "银行"),
    ("证券", "非银金融"),
    ("保险", "非银金融"),
    ("信托", "非银金融"),
    ("房地产", "房地产"),
    ("建材", "建筑材料"),
    ("水泥", "建筑材料"),
    ("玻璃", "建筑材料"),
    ("建筑", "建筑装饰"),
    ("装修", "建筑装饰"),
    ("钢铁", "钢铁"),
    ("有色", "有色金属"),
    ("煤炭", "煤炭"),
    ("石油", "石油石化"),
    ("化工", "基础化工"),
    ("电力", "公用事业"),
    ("燃气", "公用事业"),
    ("公用", "公用事业"),
    ("医药", "医药生物"),
    ("医疗", "医药生物"),
    ("制药", "医药生物"),
    ("生物", "医药生物"),
    ("中药", "医药生物"),
    ("食品", "食品饮料"),
    ("饮料", "食品饮料"),
    ("酒店", "社会服务"),
    ("餐饮", "社会服务"),
    ("旅游", "社会服务"),
    ("教育", "社会服务"),
    ("白酒", "食品饮料"),
    ("家电", "家用电器"),
    ("半导体", "电子"),
    ("元件", "电子"),
    ("电子", "电子"),
    ("计算机", "计算机"),
    ("软件", "计算机"),
    ("互联网", "计算机"),
    ("通信", "通信"),
    ("传媒", "传媒"),
    ("游戏", "传媒"),
    ("汽车", "汽车"),
    ("光伏", "电力设备"),
    ("电池", "电力设备"),
    ("电网", "电力设备"),
    ("风电", "电力设备"),
    ("机械", "机械设备"),
    ("设备", "机械设备"),
    ("军工", "国防军工"),
    ("国防", "国防军工"),
    ("航天", "国防军工"),
    ("纺织", "纺织服饰"),
    ("服装", "纺织服饰"),
    ("轻工", "轻工制造"),
    ("造纸", "轻工制造"),
    ("包装", "轻工制造"),
    ("零售", "商贸零售"),
    ("商贸", "商贸零售"),
    ("贸易", "商贸零售"),
    ("交通", "交通运输"),
    ("运输", "交通运输"),
    ("物流", "交通运输"),
    ("港口", "交通运输"),
    ("航空", "交通运输"),
    ("机场", "交通运输"),
    ("铁路", "交通运输"),
    ("公路", "交通运输"),
    ("航运", "交通运输"),
    ("环保", "环保"),
    ("农林", "农林牧渔"),
    ("牧渔", "农林牧渔"),
    ("农业", "农林牧渔"),
    ("养殖", "农林牧渔"),
    ("种植", "农林牧渔"),
    ("美容", "美容护理"),
    ("护理", "美容护理"),
    ("化学", "基础化工"),
    ("塑料", "基础化工"),
    ("橡胶", "基础化工"),
    ("化纤", "基础化工"),
    ("综合", "综合"),
];

pub fn is_shenwan_level1(name: &str) -> bool {
    SHENWAN_LEVEL1.contains(&name)
}

/// Map an industry label from any source onto a Shenwan level-1 name.
///
/// A label containing a level-1 name maps to it (longest name first);
/// otherwise the keyword table decides, defaulting to 综合.
pub fn infer_level1(raw: &str) -> &'static str {
    let text = raw.trim();
    if text.is_empty() {
        return DEFAULT_LEVEL1;
    }

    let exact = SHENWAN_LEVEL1
        .iter()
        .filter(|name| text.contains(**name))
        .max_by_key(|name| name.chars().count());
    if let Some(name) = exact {
        return *name;
    }

    KEYWORDS
        .iter()
        .find(|(keyword, _)| text.contains(keyword))
        .map(|(_, level1)| *level1)
        .unwrap_or(DEFAULT_LEVEL1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level1_list() {
        assert_eq!(SHENWAN_LEVEL1.len(), 31);
        assert!(KEYWORDS.iter().all(|(_, level1)| is_shenwan_level1(level1)));
        assert!(is_shenwan_level1(DEFAULT_LEVEL1));
    }

    #[test]
    fn test_exact_names() {
        assert_eq!(infer_level1("银行Ⅱ"), "银行");
        assert_eq!(infer_level1("房地产开发"), "房地产");
        assert_eq!(infer_level1("建筑材料"), "建筑材料");
        assert_eq!(infer_level1("电力设备"), "电力设备");
        assert_eq!(infer_level1("通信设备"), "通信");
        assert_eq!(infer_level1("汽车零部件"), "汽车");
    }

    #[test]
    fn test_keywords() {
        assert_eq!(infer_level1("证券Ⅱ"), "非银金融");
        assert_eq!(infer_level1("电力"), "公用事业");
        assert_eq!(infer_level1("化学制药"), "医药生物");
        assert_eq!(infer_level1("化学原料"), "基础化工");
        assert_eq!(infer_level1("酒店餐饮"), "社会服务");
        assert_eq!(infer_level1("白酒Ⅱ"), "食品饮料");
        assert_eq!(infer_level1("半导体"), "电子");
        assert_eq!(infer_level1("水泥建材"), "建筑材料");
        assert_eq!(infer_level1("石油加工"), "石油石化");
    }

    #[test]
    fn test_default() {
        assert_eq!(infer_level1(""), "综合");
        assert_eq!(infer_level1("未知行业"), "综合");
    }
}
