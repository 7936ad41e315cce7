//! Spreadsheet export with `rust_xlsxwriter`.
//!
//! Sheets: 基础信息, 行业分类, 财务数据, 汇总统计, 元数据. Every sheet has a
//! bold, shaded, bordered header row that stays frozen while scrolling.

use rust_xlsxwriter::{Color, Format, FormatBorder, Workbook, Worksheet, XlsxError};
use std::path::Path;

use super::{Dataset, ExportContext};
use crate::data::subject_label;

const HEADER_FILL: u32 = 0xD9E1F2;
const MISSING_FILL: u32 = 0xFFCCCC;
const WAN: f64 = 10_000.0;

pub const SHEET_COMPANIES: &str = "基础信息";
pub const SHEET_INDUSTRIES: &str = "行业分类";
pub const SHEET_FINANCIALS: &str = "财务数据";
pub const SHEET_SUMMARY: &str = "汇总统计";
pub const SHEET_METADATA: &str = "元数据";

/// Cell formats shared by every sheet.
pub struct ExcelExporter {
    header: Format,
    amount: Format,
    missing: Format,
    percent: Format,
    score: Format,
}

impl Default for ExcelExporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ExcelExporter {
    pub fn new() -> Self {
        Self {
            header: Format::new()
                .set_bold()
                .set_background_color(Color::RGB(HEADER_FILL))
                .set_border(FormatBorder::Thin),
            amount: Format::new().set_num_format("#,##0.00"),
            missing: Format::new().set_background_color(Color::RGB(MISSING_FILL)),
            percent: Format::new().set_num_format("0.00%"),
            score: Format::new().set_num_format("0.00"),
        }
    }

    /// Render all sheets and save the workbook to `path`.
    pub fn write(&self, dataset: &Dataset, context: &ExportContext, path: &Path) -> Result<(), XlsxError> {
        let mut workbook = Workbook::new();
        workbook.push_worksheet(self.companies_sheet(dataset)?);
        workbook.push_worksheet(self.industries_sheet(dataset)?);
        workbook.push_worksheet(self.financials_sheet(dataset)?);
        workbook.push_worksheet(self.summary_sheet(dataset, context)?);
        workbook.push_worksheet(self.metadata_sheet(dataset, context)?);
        workbook.save(path)
    }

    fn header_row(&self, sheet: &mut Worksheet, headers: &[String]) -> Result<(), XlsxError> {
        for (col, title) in headers.iter().enumerate() {
            let col = col as u16;
            sheet.write_string_with_format(0, col, title, &self.header)?;
            let width = (title.chars().count() as f64 * 2.0).clamp(10.0, 40.0);
            sheet.set_column_width(col, width)?;
        }
        sheet.set_freeze_panes(1, 0)?;
        Ok(())
    }

    /// Write `text`, or a highlighted blank when it is missing.
    fn optional_text(&self, sheet: &mut Worksheet, row: u32, col: u16, text: Option<&str>) -> Result<(), XlsxError> {
        match text {
            Some(text) if !text.is_empty() => sheet.write_string(row, col, text)?,
            _ => sheet.write_blank(row, col, &self.missing)?,
        };
        Ok(())
    }

    fn companies_sheet(&self, dataset: &Dataset) -> Result<Worksheet, XlsxError> {
        let mut sheet = Worksheet::new();
        sheet.set_name(SHEET_COMPANIES)?;
        self.header_row(&mut sheet, &titles(&["代码", "名称", "市场", "上市日期", "数据源"]))?;

        for (i, company) in dataset.companies.iter().enumerate() {
            let row = i as u32 + 1;
            sheet.write_string(row, 0, &company.code)?;
            sheet.write_string(row, 1, &company.name)?;
            sheet.write_string(row, 2, company.market.label())?;
            let list_date = company.list_date.map(|d| d.format("%Y-%m-%d").to_string());
            self.optional_text(&mut sheet, row, 3, list_date.as_deref())?;
            sheet.write_string(row, 4, &company.source)?;
        }
        Ok(sheet)
    }

    fn industries_sheet(&self, dataset: &Dataset) -> Result<Worksheet, XlsxError> {
        let mut sheet = Worksheet::new();
        sheet.set_name(SHEET_INDUSTRIES)?;
        self.header_row(
            &mut sheet,
            &titles(&["代码", "名称", "一级行业", "二级行业", "三级行业", "数据源"]),
        )?;

        for (i, company) in dataset.companies.iter().enumerate() {
            let row = i as u32 + 1;
            let industry = dataset.industry(&company.code);
            sheet.write_string(row, 0, &company.code)?;
            sheet.write_string(row, 1, &company.name)?;
            self.optional_text(&mut sheet, row, 2, industry.and_then(|i| i.level1.as_deref()))?;
            self.optional_text(&mut sheet, row, 3, industry.and_then(|i| i.level2.as_deref()))?;
            self.optional_text(&mut sheet, row, 4, industry.and_then(|i| i.level3.as_deref()))?;
            sheet.write_string(row, 5, industry.map_or("", |i| i.source.as_str()))?;
        }
        Ok(sheet)
    }

    /// One column per (period, subject) in 万元.
    fn financials_sheet(&self, dataset: &Dataset) -> Result<Worksheet, XlsxError> {
        let mut sheet = Worksheet::new();
        sheet.set_name(SHEET_FINANCIALS)?;

        let cells: Vec<_> = dataset
            .periods
            .iter()
            .flat_map(|p| dataset.subjects.iter().map(move |s| (*p, s.as_str())))
            .collect();

        let mut headers = titles(&["代码", "名称", "一级行业"]);
        headers.extend(cells.iter().map(|(period, subject)| {
            format!(
                "{} {}(万元)",
                period.format("%Y-%m-%d"),
                subject_label(subject).unwrap_or(subject)
            )
        }));
        self.header_row(&mut sheet, &headers)?;

        for (i, company) in dataset.companies.iter().enumerate() {
            let row = i as u32 + 1;
            sheet.write_string(row, 0, &company.code)?;
            sheet.write_string(row, 1, &company.name)?;
            let level1 = dataset.industry(&company.code).and_then(|i| i.level1.as_deref());
            self.optional_text(&mut sheet, row, 2, level1)?;

            for (j, (period, subject)) in cells.iter().enumerate() {
                let col = (j + 3) as u16;
                match dataset.value(&company.code, *period, subject) {
                    Some(value) => sheet.write_number_with_format(row, col, value / WAN, &self.amount)?,
                    None => sheet.write_blank(row, col, &self.missing)?,
                };
            }
        }
        Ok(sheet)
    }

    fn summary_sheet(&self, dataset: &Dataset, context: &ExportContext) -> Result<Worksheet, XlsxError> {
        let mut sheet = Worksheet::new();
        sheet.set_name(SHEET_SUMMARY)?;
        self.header_row(&mut sheet, &titles(&["指标", "数值"]))?;

        let total = dataset.companies.len();
        let ratio = |part: usize, whole: usize| if whole == 0 { 0.0 } else { part as f64 / whole as f64 };
        let (filled, cells) = dataset.cell_fill();
        let with_industry = dataset.stocks_with_industry();

        let mut rows = SummaryRows::new(&mut sheet);
        rows.number("股票总数", total as f64, None)?;
        rows.number("有行业分类股票数", with_industry as f64, None)?;
        rows.number("行业覆盖率", ratio(with_industry, total), Some(&self.percent))?;
        for (period, count) in dataset.stocks_with_period() {
            let label = format!("{} 财务数据覆盖率", period.format("%Y-%m-%d"));
            rows.number(&label, ratio(count, total), Some(&self.percent))?;
        }
        rows.number("财务数据填充率", ratio(filled, cells), Some(&self.percent))?;
        rows.number("验证准确率", context.validation.accuracy(), Some(&self.percent))?;
        rows.number("验证失败记录数", context.validation.invalid as f64, None)?;

        let quality = &context.quality;
        rows.number("质量评分", quality.overall, Some(&self.score))?;
        rows.text("质量等级", quality.grade.label())?;
        rows.number("完整性", quality.completeness, Some(&self.score))?;
        rows.number("准确性", quality.accuracy, Some(&self.score))?;
        rows.number("及时性", quality.timeliness, Some(&self.score))?;
        rows.number("覆盖度", quality.coverage, Some(&self.score))?;
        rows.text("运行状态", if context.interrupted { "已中断" } else { "完成" })?;
        for issue in &quality.issues {
            rows.text("问题", issue)?;
        }
        Ok(sheet)
    }

    fn metadata_sheet(&self, dataset: &Dataset, context: &ExportContext) -> Result<Worksheet, XlsxError> {
        let mut sheet = Worksheet::new();
        sheet.set_name(SHEET_METADATA)?;
        self.header_row(
            &mut sheet,
            &titles(&[
                "项目", "内容", "优先级", "启用", "健康", "请求数", "成功数", "成功率", "平均延迟(ms)", "最近错误",
            ]),
        )?;

        let periods: Vec<String> = dataset.periods.iter().map(|p| p.format("%Y-%m-%d").to_string()).collect();
        let mut row = 1;
        let mut pair = |sheet: &mut Worksheet, key: &str, value: &str| -> Result<(), XlsxError> {
            sheet.write_string(row, 0, key)?;
            sheet.write_string(row, 1, value)?;
            row += 1;
            Ok(())
        };

        pair(&mut sheet, "生成时间", &context.generated_at.format("%Y-%m-%d %H:%M:%S").to_string())?;
        pair(&mut sheet, "数据源", &dataset.sources().join(", "))?;
        pair(&mut sheet, "报告期", &periods.join(", "))?;
        pair(&mut sheet, "科目", &dataset.subjects.join(", "))?;
        if let Some(diff) = &context.diff {
            pair(&mut sheet, "股票列表变更", &diff.to_string())?;
        }

        row += 1;
        for provider in &context.providers {
            sheet.write_string(row, 0, "数据源统计")?;
            sheet.write_string(row, 1, &provider.name)?;
            sheet.write_number(row, 2, provider.priority)?;
            sheet.write_string(row, 3, yes_no(provider.enabled))?;
            sheet.write_string(row, 4, yes_no(provider.healthy))?;
            sheet.write_number(row, 5, provider.request_count as f64)?;
            sheet.write_number(row, 6, provider.success_count as f64)?;
            match provider.success_rate() {
                Some(rate) => sheet.write_number_with_format(row, 7, rate, &self.percent)?,
                None => sheet.write_blank(row, 7, &self.missing)?,
            };
            if let Some(latency) = provider.avg_latency_ms {
                sheet.write_number_with_format(row, 8, latency, &self.score)?;
            }
            if let Some(error) = &provider.last_error {
                sheet.write_string(row, 9, error)?;
            }
            row += 1;
        }
        Ok(sheet)
    }
}

/// Sequential (label, value) rows under a header.
struct SummaryRows<'a> {
    sheet: &'a mut Worksheet,
    row: u32,
}

impl<'a> SummaryRows<'a> {
    fn new(sheet: &'a mut Worksheet) -> Self {
        Self { sheet, row: 1 }
    }

    fn number(&mut self, label: &str, value: f64, format: Option<&Format>) -> Result<(), XlsxError> {
        self.sheet.write_string(self.row, 0, label)?;
        match format {
            Some(format) => self.sheet.write_number_with_format(self.row, 1, value, format)?,
            None => self.sheet.write_number(self.row, 1, value)?,
        };
        self.row += 1;
        Ok(())
    }

    fn text(&mut self, label: &str, value: &str) -> Result<(), XlsxError> {
        self.sheet.write_string(self.row, 0, label)?;
        self.sheet.write_string(self.row, 1, value)?;
        self.row += 1;
        Ok(())
    }
}

fn titles(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "是"
    } else {
        "否"
    }
}
