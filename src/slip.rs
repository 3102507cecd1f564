//! Generated paperwork: the order sheet, per-department job slips and the
//! dispatch delivery note. PDFs are built in memory and never stored.

use anyhow::anyhow;
use chrono::{DateTime, FixedOffset};
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};
use packflow_common::lifecycle::{self, LifecycleError};
use packflow_common::timefmt;
use packflow_common::{Order, Stage};

use crate::config::CompanySection;
use crate::errors::OmsError;
use crate::qr::{self, GrayImage};

const PAGE_WIDTH: i64 = 595;
const PAGE_HEIGHT: i64 = 842;
const MARGIN: i64 = 50;
const LINE_HEIGHT: i64 = 15;
const WRAP_AT: usize = 80;
/// Printed edge of the tracking QR code, in points.
const QR_SIZE: i64 = 110;

#[derive(Debug, Clone, PartialEq)]
enum Line {
    Title(String),
    Heading(String),
    Field(String, String),
    Text(String),
    /// Square space reserved for the sheet's image.
    Image(i64),
    Blank,
}

/// Ordered lines of a single document, laid out top to bottom.
#[derive(Debug, Default)]
struct Sheet {
    lines: Vec<Line>,
    image: Option<GrayImage>,
}

impl Sheet {
    fn title(&mut self, text: impl Into<String>) -> &mut Self {
        self.lines.push(Line::Title(text.into()));
        self
    }

    fn heading(&mut self, text: impl Into<String>) -> &mut Self {
        self.lines.push(Line::Blank);
        self.lines.push(Line::Heading(text.into()));
        self
    }

    /// Empty values are skipped.
    fn field(&mut self, label: &str, value: impl Into<String>) -> &mut Self {
        let value = value.into();
        if !value.trim().is_empty() {
            self.lines.push(Line::Field(label.to_string(), value));
        }
        self
    }

    fn text(&mut self, text: impl Into<String>) -> &mut Self {
        self.lines.push(Line::Text(text.into()));
        self
    }

    fn image(&mut self, image: GrayImage, size: i64) -> &mut Self {
        self.image = Some(image);
        self.lines.push(Line::Image(size));
        self
    }

    fn blank(&mut self) -> &mut Self {
        self.lines.push(Line::Blank);
        self
    }

    fn render(&self) -> Result<Vec<u8>, OmsError> {
        let pages = paginate(&self.lines);
        write_pdf(&pages, self.image.as_ref())
    }
}

/// Helvetica only covers Latin-1; anything else is replaced.
fn pdf_text(raw: &str) -> Vec<u8> {
    raw.chars()
        .map(|c| match c {
            '\u{20b9}' => "Rs.".to_string(),
            c if c.is_ascii() && !c.is_ascii_control() => c.to_string(),
            _ => "?".to_string(),
        })
        .collect::<String>()
        .into_bytes()
}

fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            if !current.is_empty() && current.len() + word.len() + 1 > width {
                lines.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
        lines.push(current);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

/// Text runs for one page: (font size, bold, x, y, text).
type Run = (i64, bool, i64, i64, String);

/// Lower-left corner and edge length of an image drawn on a page.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Placement {
    x: i64,
    y: i64,
    size: i64,
}

#[derive(Debug, Default)]
struct Page {
    runs: Vec<Run>,
    images: Vec<Placement>,
}

/// Moves `y` down by `height`, starting a new page when it would run into
/// the bottom margin.
fn reserve<'a>(pages: &'a mut Vec<Page>, y: &mut i64, height: i64) -> &'a mut Page {
    if *y - height < MARGIN || pages.is_empty() {
        pages.push(Page::default());
        *y = PAGE_HEIGHT - MARGIN;
    }
    *y -= height;
    let last = pages.len() - 1;
    &mut pages[last]
}

fn place(pages: &mut Vec<Page>, y: &mut i64, height: i64, run: (i64, bool, i64, String)) {
    let page = reserve(pages, y, height);
    page.runs.push((run.0, run.1, run.2, *y, run.3));
}

fn paginate(lines: &[Line]) -> Vec<Page> {
    let mut pages = vec![Page::default()];
    let mut y = PAGE_HEIGHT - MARGIN;
    for line in lines {
        match line {
            Line::Title(text) => place(&mut pages, &mut y, 26, (18, true, MARGIN, text.clone())),
            Line::Heading(text) => {
                place(&mut pages, &mut y, LINE_HEIGHT + 2, (12, true, MARGIN, text.clone()))
            }
            Line::Field(label, value) => {
                for (i, part) in wrap(value, WRAP_AT - 24).into_iter().enumerate() {
                    if i == 0 {
                        // Label and first value line share a baseline.
                        place(&mut pages, &mut y, LINE_HEIGHT, (10, true, MARGIN, format!("{}:", label)));
                        y += LINE_HEIGHT;
                    }
                    place(&mut pages, &mut y, LINE_HEIGHT, (10, false, MARGIN + 160, part));
                }
            }
            Line::Text(text) => {
                for part in wrap(text, WRAP_AT) {
                    place(&mut pages, &mut y, LINE_HEIGHT, (10, false, MARGIN, part));
                }
            }
            Line::Image(size) => {
                let page = reserve(&mut pages, &mut y, *size);
                page.images.push(Placement {
                    x: MARGIN,
                    y,
                    size: *size,
                });
            }
            Line::Blank => y -= LINE_HEIGHT / 2,
        }
    }
    pages
}

fn page_content(page: &Page) -> Result<Vec<u8>, OmsError> {
    let mut operations = Vec::new();
    for image in &page.images {
        operations.push(Operation::new("q", vec![]));
        operations.push(Operation::new(
            "cm",
            vec![
                image.size.into(),
                0.into(),
                0.into(),
                image.size.into(),
                image.x.into(),
                image.y.into(),
            ],
        ));
        operations.push(Operation::new("Do", vec!["Im1".into()]));
        operations.push(Operation::new("Q", vec![]));
    }
    for (size, bold, x, y, text) in &page.runs {
        let font = if *bold { "F2" } else { "F1" };
        operations.push(Operation::new("BT", vec![]));
        operations.push(Operation::new("Tf", vec![font.into(), (*size).into()]));
        operations.push(Operation::new("Td", vec![(*x).into(), (*y).into()]));
        operations.push(Operation::new("Tj", vec![Object::string_literal(pdf_text(text))]));
        operations.push(Operation::new("ET", vec![]));
    }
    Content { operations }
        .encode()
        .map_err(|e| OmsError::Other(anyhow!("failed to encode PDF content: {}", e)))
}

fn write_pdf(pages: &[Page], image: Option<&GrayImage>) -> Result<Vec<u8>, OmsError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let regular = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let bold = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
    });
    let mut resources = dictionary! {
        "Font" => dictionary! {
            "F1" => regular,
            "F2" => bold,
        },
    };
    if let Some(image) = image {
        let side = image.width as i64;
        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => side,
                "Height" => side,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8_i64,
                "Interpolate" => false,
            },
            image.pixels.clone(),
        ));
        resources.set("XObject", dictionary! { "Im1" => image_id });
    }
    let resources_id = doc.add_object(resources);

    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for page in pages {
        let content_id = doc.add_object(Stream::new(dictionary! {}, page_content(page)?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
            "Resources" => resources_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| OmsError::Other(anyhow!("failed to write PDF: {}", e)))?;
    Ok(buffer)
}

// ── Documents ─────────────────────────────────────────────────────────

fn display_time(raw: &str, offset: FixedOffset) -> String {
    timefmt::parse_timestamp(raw, offset)
        .map(timefmt::format_display)
        .unwrap_or_else(|| raw.to_string())
}

/// `paper_quality` -> `Paper quality`
fn label_for(field: &str) -> String {
    let spaced = field.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn company_header(sheet: &mut Sheet, company: &CompanySection) {
    sheet.title(company.name.clone());
    if !company.tagline.is_empty() {
        sheet.text(company.tagline.clone());
    }
    let contact: Vec<String> = [
        (!company.phone.is_empty()).then(|| format!("Phone: {}", company.phone)),
        (!company.gstin.is_empty()).then(|| format!("GSTIN: {}", company.gstin)),
        (!company.website.is_empty()).then(|| company.website.clone()),
    ]
    .into_iter()
    .flatten()
    .collect();
    if !contact.is_empty() {
        sheet.text(contact.join("  |  "));
    }
}

fn order_block(sheet: &mut Sheet, order: &Order, offset: FixedOffset) {
    sheet
        .field("Order ID", order.order_id.clone())
        .field("Customer", order.customer.clone())
        .field("Product", order.item.clone())
        .field("Type", order.product_type.to_string())
        .field("Category", order.category.clone())
        .field("Quantity", order.qty.to_string())
        .field("Priority", order.priority.to_string())
        .field("Due", display_time(&order.due, offset));
}

/// Order confirmation handed to the customer.
pub fn order_sheet(
    order: &Order,
    company: &CompanySection,
    offset: FixedOffset,
) -> Result<Vec<u8>, OmsError> {
    let mut sheet = Sheet::default();
    company_header(&mut sheet, company);
    sheet.heading("ORDER CONFIRMATION");

    sheet
        .heading("Customer")
        .field("Name", order.customer.clone())
        .field("Phone", order.customer_phone.clone())
        .field("Email", order.customer_email.clone());

    sheet
        .heading("Order")
        .field("Order ID", order.order_id.clone())
        .field("Received", display_time(&order.received, offset))
        .field("Due", display_time(&order.due, offset))
        .field("Product type", order.product_type.to_string())
        .field("Category", order.category.clone())
        .field("Priority", order.priority.to_string())
        .field("Quantity", order.qty.to_string())
        .field("Rate", format!("Rs. {:.2}", order.rate))
        .field("Total value", format!("Rs. {:.2}", order.total_value()))
        .field("Advance received", if order.advance_paid() { "Yes" } else { "No" });

    sheet
        .heading("Specification")
        .field("Board thickness", order.board_thickness_id.clone())
        .field("Paper thickness", order.paper_thickness_id.clone())
        .field("Size", order.size_id.clone())
        .field("Foil", order.foil_id.clone())
        .field("Spot UV", order.spotuv_id.clone())
        .field("Description", order.item.clone());

    if !order.tracking_url.is_empty() {
        sheet
            .heading("Track your order")
            .text(order.tracking_url.clone())
            .image(qr::gray_image(&order.tracking_url)?, QR_SIZE);
    }
    sheet.blank().text(format!("Thank you for choosing {}.", company.name));
    sheet.render()
}

/// Job slip for one department. Dispatch produces the delivery note.
pub fn stage_slip(
    order: &Order,
    stage: Stage,
    generated_by: &str,
    now: DateTime<FixedOffset>,
    company: &CompanySection,
) -> Result<Vec<u8>, OmsError> {
    if stage.is_terminal() || !order.product_type.visits(stage) {
        return Err(LifecycleError::NotInPipeline {
            stage,
            product: order.product_type,
        }
        .into());
    }
    if stage == Stage::Dispatch {
        return delivery_note(order, generated_by, now, company);
    }
    let offset = *now.offset();
    let mut sheet = Sheet::default();
    sheet.title(format!("{} JOB SLIP", stage.as_str().to_uppercase()));
    sheet.text(company.name.clone());

    sheet.heading("Order");
    order_block(&mut sheet, order, offset);

    if let Some(spec) = lifecycle::stage_spec(stage) {
        sheet.heading(format!("{} details", stage));
        for name in spec.detail_fields {
            sheet.field(
                &label_for(name),
                lifecycle::detail(order, stage, name).unwrap_or_default(),
            );
        }
        for slot in spec.file_slots {
            let state = match order.file_at(slot.path) {
                Some(entry) => entry.name().unwrap_or("uploaded").to_string(),
                None => "not uploaded".to_string(),
            };
            sheet.field(slot.label, state);
        }
    }

    let timer = lifecycle::timer(order, stage, offset);
    sheet
        .heading("Progress")
        .field("Timer", timer.label().replace('_', " "))
        .field("Time spent", timefmt::format_elapsed(timer.elapsed(now)));
    if let Some(done) = lifecycle::completion_raw(order, stage) {
        sheet
            .field("Completed at", display_time(done, offset))
            .field(
                "Completed by",
                lifecycle::completed_by(order, stage).unwrap_or_default(),
            );
    }
    if !order.admin_notes.is_empty() {
        sheet.heading("Instructions").text(order.admin_notes.clone());
    }
    sheet.blank().text(format!(
        "Generated by {} on {}",
        generated_by,
        timefmt::format_display(now)
    ));
    sheet.render()
}

fn delivery_note(
    order: &Order,
    generated_by: &str,
    now: DateTime<FixedOffset>,
    company: &CompanySection,
) -> Result<Vec<u8>, OmsError> {
    let mut sheet = Sheet::default();
    company_header(&mut sheet, company);
    sheet.heading("DELIVERY NOTE");
    sheet
        .field("Order ID", order.order_id.clone())
        .field("Date", timefmt::format_display(now));

    sheet
        .heading("Deliver to")
        .field("Customer", order.customer.clone())
        .field("Phone", order.customer_phone.clone())
        .field("Email", order.customer_email.clone());

    sheet
        .heading("Consignment")
        .field("Product", order.item.clone())
        .field("Type", order.product_type.to_string())
        .field("Category", order.category.clone())
        .field("Quantity", order.qty.to_string())
        .field(
            "Courier",
            lifecycle::detail(order, Stage::Dispatch, "courier").unwrap_or_default(),
        )
        .field(
            "Tracking number",
            lifecycle::detail(order, Stage::Dispatch, "tracking_number").unwrap_or_default(),
        );

    sheet
        .blank()
        .blank()
        .text("Received in good condition:")
        .blank()
        .text("Signature ____________________        Date ____________")
        .blank()
        .text(format!("Prepared by {}", generated_by));
    sheet.render()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2024-12-03T15:30:00+05:30").unwrap()
    }

    fn order(stage: &str, product: &str) -> Order {
        Order::from_record(
            "-Mkey",
            json!({
                "order_id": "SRP007",
                "customer": "ABC (Traders)",
                "customer_phone": "98765 43210",
                "item": "Rigid box \\ gold foil",
                "qty": 500,
                "rate": 12.5,
                "product_type": product,
                "stage": stage,
                "received": "2024-12-01T10:00:00+05:30",
                "tracking_url": "https://srppackaging.com/tracking.html?id=SRP007",
                "printing_paper_quality": "Art card 300gsm",
                "dispatch_courier": "BlueDart",
                "dispatch_tracking_number": "BD123"
            }),
        )
        .unwrap()
    }

    fn assert_pdf(bytes: &[u8]) -> Document {
        assert!(bytes.starts_with(b"%PDF"));
        Document::load_mem(bytes).unwrap()
    }

    #[test]
    fn test_order_sheet_is_valid_pdf() {
        let bytes = order_sheet(&order("Design", "Box"), &CompanySection::default(), *now().offset()).unwrap();
        let doc = assert_pdf(&bytes);
        assert_eq!(doc.get_pages().len(), 1);
    }

    fn image_streams(doc: &Document) -> usize {
        doc.objects
            .values()
            .filter(|object| match object {
                Object::Stream(stream) => {
                    stream.dict.get(b"Subtype").and_then(Object::as_name).ok() == Some(&b"Image"[..])
                }
                _ => false,
            })
            .count()
    }

    #[test]
    fn test_order_sheet_embeds_tracking_qr() {
        let bytes = order_sheet(&order("Design", "Box"), &CompanySection::default(), *now().offset()).unwrap();
        let doc = assert_pdf(&bytes);
        assert_eq!(image_streams(&doc), 1);

        let mut untracked = order("Design", "Box");
        untracked.tracking_url.clear();
        let bytes = order_sheet(&untracked, &CompanySection::default(), *now().offset()).unwrap();
        assert_eq!(image_streams(&assert_pdf(&bytes)), 0);
    }

    #[test]
    fn test_image_line_reserves_space() {
        let pages = paginate(&[Line::Text("a".into()), Line::Image(QR_SIZE)]);
        assert_eq!(pages.len(), 1);
        let placed = pages[0].images[0];
        assert_eq!(placed.x, MARGIN);
        assert_eq!(placed.y, PAGE_HEIGHT - MARGIN - LINE_HEIGHT - QR_SIZE);
    }

    #[test]
    fn test_stage_slip_for_printing() {
        let bytes = stage_slip(
            &order("Printing", "Box"),
            Stage::Printing,
            "ravi",
            now(),
            &CompanySection::default(),
        )
        .unwrap();
        assert_pdf(&bytes);
    }

    #[test]
    fn test_dispatch_produces_delivery_note() {
        let bytes = stage_slip(
            &order("Dispatch", "Bag"),
            Stage::Dispatch,
            "ravi",
            now(),
            &CompanySection::default(),
        )
        .unwrap();
        assert_pdf(&bytes);
    }

    #[test]
    fn test_slip_rejects_stage_off_pipeline() {
        let err = stage_slip(
            &order("Printing", "Bag"),
            Stage::DieCut,
            "ravi",
            now(),
            &CompanySection::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            OmsError::Lifecycle(LifecycleError::NotInPipeline { .. })
        ));
    }

    #[test]
    fn test_long_content_spans_pages() {
        let mut sheet = Sheet::default();
        for i in 0..120 {
            sheet.text(format!("line {}", i));
        }
        let doc = assert_pdf(&sheet.render().unwrap());
        assert!(doc.get_pages().len() >= 2);
    }

    #[test]
    fn test_helpers() {
        assert_eq!(label_for("paper_quality"), "Paper quality");
        assert_eq!(pdf_text("\u{20b9}5 caf\u{e9}"), b"Rs.5 caf?".to_vec());
        assert_eq!(wrap("a bb ccc", 4), vec!["a bb", "ccc"]);
        assert_eq!(wrap("", 10), vec![String::new()]);
    }
}
